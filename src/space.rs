//! Multi-tenant spaces and access control (spec §4.4)
//!
//! A `Space` is a logical namespace memories live in. Callers hold a `Role`
//! within a space; roles are totally ordered (`Reader < Writer < Admin`) so
//! `check` can ask "does this role satisfy at least `Writer`?" with a single
//! comparison. Expired spaces are evicted lazily on `check`/`list` rather
//! than on a background timer, the same lazy-expiry shape the teacher uses
//! for cache invalidation.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Capability level held within a space. Ordered: a caller checked against
/// `Role::Writer` also passes if they hold `Role::Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Writer,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reader" => Some(Self::Reader),
            "writer" => Some(Self::Writer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SpaceError {
    #[error("unknown space: {0}")]
    Unknown(String),
    #[error("space expired: {0}")]
    Expired(String),
    #[error("role {held:?} does not satisfy required role {required:?} in space {space}")]
    Forbidden { space: String, held: Role, required: Role },
    #[error("invalid role string: {0}")]
    InvalidRole(String),
}

/// A namespace with per-principal roles and an optional TTL.
#[derive(Debug, Clone)]
pub struct Space {
    pub name: String,
    pub roles: HashMap<String, Role>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Space {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            roles: HashMap::new(),
            created_at: now,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}

/// Registry of all known spaces. `RwLock<HashMap<...>>`, same shape as
/// `InMemoryStore`'s record table — reads are common (every retrieve checks
/// ACLs), writes (join/grant/revoke) are comparatively rare.
#[derive(Default)]
pub struct SpaceRegistry {
    spaces: RwLock<HashMap<String, Space>>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the space if absent, or refresh its TTL if present. Does not
    /// touch existing role grants.
    pub fn upsert(&self, name: &str, now: DateTime<Utc>, ttl: Option<Duration>) {
        let mut guard = self.spaces.write().unwrap();
        let space = guard.entry(name.to_string()).or_insert_with(|| Space::new(name, now));
        space.expires_at = ttl.map(|d| now + d);
    }

    /// Grant `role` to `principal` in `space`, creating the space if absent.
    /// `ttl` refreshes the space's expiry the same way `upsert` does; pass
    /// `None` to leave an existing expiry untouched and create a
    /// non-expiring space if absent.
    pub fn grant(&self, space: &str, principal: &str, role: Role, now: DateTime<Utc>, ttl: Option<Duration>) {
        let mut guard = self.spaces.write().unwrap();
        let entry = guard.entry(space.to_string()).or_insert_with(|| Space::new(space, now));
        entry.roles.insert(principal.to_string(), role);
        if let Some(d) = ttl {
            entry.expires_at = Some(now + d);
        }
    }

    /// Parse `role` and grant it, failing with `InvalidRole` instead of
    /// panicking or silently dropping an unrecognized role string (spec
    /// §4.4).
    pub fn grant_named(&self, space: &str, principal: &str, role: &str, now: DateTime<Utc>, ttl: Option<Duration>) -> Result<(), SpaceError> {
        let parsed = Role::parse(role).ok_or_else(|| SpaceError::InvalidRole(role.to_string()))?;
        self.grant(space, principal, parsed, now, ttl);
        Ok(())
    }

    /// Revoke all access `principal` has in `space`. No-op if either is
    /// unknown.
    pub fn revoke(&self, space: &str, principal: &str) {
        if let Some(s) = self.spaces.write().unwrap().get_mut(space) {
            s.roles.remove(principal);
        }
    }

    /// Assert `principal` holds at least `required` in `space`. Lazily
    /// evicts the space first if its TTL has lapsed.
    pub fn check(&self, space: &str, principal: &str, required: Role, now: DateTime<Utc>) -> Result<(), SpaceError> {
        {
            let guard = self.spaces.read().unwrap();
            match guard.get(space) {
                Some(s) if s.is_expired(now) => {}
                Some(s) => {
                    return match s.roles.get(principal) {
                        Some(held) if *held >= required => Ok(()),
                        Some(held) => Err(SpaceError::Forbidden {
                            space: space.to_string(),
                            held: *held,
                            required,
                        }),
                        None => Err(SpaceError::Forbidden {
                            space: space.to_string(),
                            held: Role::Reader,
                            required,
                        }),
                    };
                }
                None => return Err(SpaceError::Unknown(space.to_string())),
            }
        }
        self.spaces.write().unwrap().remove(space);
        Err(SpaceError::Expired(space.to_string()))
    }

    /// Names of every non-expired space.
    pub fn list(&self, now: DateTime<Utc>) -> Vec<String> {
        self.spaces
            .read()
            .unwrap()
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Remove every expired space, returning how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.spaces.write().unwrap();
        let before = guard.len();
        guard.retain(|_, s| !s.is_expired(now));
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_satisfies_writer_with_admin() {
        assert!(Role::Admin >= Role::Writer);
        assert!(Role::Reader < Role::Writer);
    }

    #[test]
    fn check_fails_for_unknown_space() {
        let reg = SpaceRegistry::new();
        let err = reg.check("ghost", "alice", Role::Reader, Utc::now()).unwrap_err();
        assert!(matches!(err, SpaceError::Unknown(_)));
    }

    #[test]
    fn grant_then_check_succeeds_for_sufficient_role() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.grant("team-a", "alice", Role::Writer, now, None);
        assert!(reg.check("team-a", "alice", Role::Reader, now).is_ok());
        assert!(reg.check("team-a", "alice", Role::Writer, now).is_ok());
        assert!(reg.check("team-a", "alice", Role::Admin, now).is_err());
    }

    #[test]
    fn revoke_removes_access() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.grant("team-a", "alice", Role::Writer, now, None);
        reg.revoke("team-a", "alice");
        assert!(reg.check("team-a", "alice", Role::Reader, now).is_err());
    }

    #[test]
    fn expired_space_is_evicted_on_check() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.grant("team-a", "alice", Role::Admin, now, None);
        reg.upsert("team-a", now, Some(Duration::seconds(1)));
        let later = now + Duration::seconds(5);
        let err = reg.check("team-a", "alice", Role::Reader, later).unwrap_err();
        assert!(matches!(err, SpaceError::Expired(_)));
        assert!(reg.list(later).is_empty());
    }

    #[test]
    fn grant_named_parses_valid_roles() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.grant_named("team-a", "alice", "admin", now, None).unwrap();
        assert!(reg.check("team-a", "alice", Role::Admin, now).is_ok());
    }

    #[test]
    fn grant_named_rejects_unknown_role_strings() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        let err = reg.grant_named("team-a", "alice", "owner", now, None).unwrap_err();
        assert!(matches!(err, SpaceError::InvalidRole(ref s) if s == "owner"));
        // The failed parse must not have created the space as a side effect.
        assert!(reg.check("team-a", "alice", Role::Reader, now).is_err());
    }

    #[test]
    fn grant_ttl_expires_the_granted_role() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.grant("team-a", "alice", Role::Writer, now, Some(Duration::seconds(1)));
        let later = now + Duration::seconds(5);
        assert!(reg.check("team-a", "alice", Role::Reader, later).is_err());
    }

    #[test]
    fn prune_drops_only_expired_spaces() {
        let reg = SpaceRegistry::new();
        let now = Utc::now();
        reg.upsert("stays", now, None);
        reg.upsert("goes", now, Some(Duration::seconds(1)));
        let later = now + Duration::seconds(5);
        assert_eq!(reg.prune(later), 1);
        assert_eq!(reg.list(later), vec!["stays".to_string()]);
    }
}
