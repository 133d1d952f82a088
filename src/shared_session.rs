//! ACL'd shared-session memory (spec §4.4)
//!
//! Wraps a [`SessionMemory`] whose ring buffers are keyed by *space* name
//! instead of an arbitrary session id, plus the caller's own local session
//! id for content not yet broadcast anywhere. Every write checks
//! [`Role::Writer`] and every read checks [`Role::Reader`] against the
//! joined space via the shared [`SpaceRegistry`].

use crate::cancel::CancelToken;
use crate::engine::{Engine, EngineError};
use crate::record::MemoryRecord;
use crate::session::SessionMemory;
use crate::space::{Role, SpaceError, SpaceRegistry};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SharedSessionError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SharedSession {
    local_session_id: String,
    principal: String,
    memory: SessionMemory,
    engine: Arc<Engine>,
    spaces: RwLock<HashSet<String>>,
    registry: Arc<SpaceRegistry>,
}

impl SharedSession {
    pub fn new(local_session_id: impl Into<String>, principal: impl Into<String>, engine: Arc<Engine>, registry: Arc<SpaceRegistry>, ring_capacity: usize) -> Self {
        Self {
            local_session_id: local_session_id.into(),
            principal: principal.into(),
            memory: SessionMemory::with_engine(engine.clone(), ring_capacity),
            engine,
            spaces: RwLock::new(HashSet::new()),
            registry,
        }
    }

    pub fn join(&self, space: &str) {
        self.spaces.write().unwrap().insert(space.to_string());
    }

    pub fn leave(&self, space: &str) {
        self.spaces.write().unwrap().remove(space);
    }

    pub fn joined_spaces(&self) -> Vec<String> {
        self.spaces.read().unwrap().iter().cloned().collect()
    }

    /// Buffer a turn under the caller's own session id, not yet visible to
    /// anyone in any space.
    pub fn add_short_local(&self, content: &str, now: DateTime<Utc>) -> MemoryRecord {
        self.memory.add_short_term(&self.local_session_id, content, now)
    }

    /// Buffer a turn under `space`'s ring buffer. Requires `Writer`.
    pub fn add_short_to(&self, space: &str, content: &str, now: DateTime<Utc>) -> Result<MemoryRecord, SharedSessionError> {
        self.registry.check(space, &self.principal, Role::Writer, now)?;
        Ok(self.memory.add_short_term(space, content, now))
    }

    /// Persist directly to long-term memory tagged to `space`. Requires
    /// `Writer`.
    pub fn store_long_to(&self, cancel: &CancelToken, space: &str, content: &str, metadata: Option<Value>, now: DateTime<Utc>) -> Result<MemoryRecord, SharedSessionError> {
        self.registry.check(space, &self.principal, Role::Writer, now)?;
        let mut meta = metadata.unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("space".to_string(), Value::from(space));
        }
        Ok(self.engine.store(cancel, &self.local_session_id, content, Some(meta))?)
    }

    /// Store the same content into every joined space the principal can
    /// write to, skipping (not failing on) spaces that reject it.
    pub fn broadcast_long(&self, cancel: &CancelToken, content: &str, metadata: Option<Value>, now: DateTime<Utc>) -> Vec<(String, Result<MemoryRecord, SharedSessionError>)> {
        self.joined_spaces()
            .into_iter()
            .map(|space| {
                let result = self.store_long_to(cancel, &space, content, metadata.clone(), now);
                (space, result)
            })
            .collect()
    }

    /// Flush the caller's own unbroadcast short-term buffer.
    pub fn flush_local(&self, cancel: &CancelToken) -> Result<Vec<MemoryRecord>, SharedSessionError> {
        Ok(self.memory.flush_to_long_term(cancel, &self.local_session_id)?)
    }

    /// Flush a joined space's short-term buffer. Requires `Writer`.
    pub fn flush_space(&self, cancel: &CancelToken, space: &str, now: DateTime<Utc>) -> Result<Vec<MemoryRecord>, SharedSessionError> {
        self.registry.check(space, &self.principal, Role::Writer, now)?;
        Ok(self.memory.flush_to_long_term(cancel, space)?)
    }

    /// Retrieve across every joined, readable space: oversample long-term
    /// candidates, filter to spaces the principal can actually read, merge
    /// with short-term buffers (local plus each readable joined space),
    /// dedup by id (or `(session_id, trimmed content)` for unpersisted
    /// records), preferring short-term entries when trimming to `limit`.
    pub fn retrieve(&self, cancel: &CancelToken, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<MemoryRecord>, SharedSessionError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let joined = self.joined_spaces();
        // The caller's own session is always readable: it's where
        // `flush_local`/`add_short_local` content lands, and it's never a
        // joined space so it would otherwise never pass the ACL filter
        // below.
        let mut readable: HashSet<String> = HashSet::new();
        readable.insert(self.local_session_id.clone());
        readable.extend(joined.into_iter().filter(|space| self.registry.check(space, &self.principal, Role::Reader, now).is_ok()));

        let oversample = (limit * 6).max(limit);
        let candidates = self.engine.retrieve(cancel, query, oversample)?;
        let long_term: Vec<MemoryRecord> = candidates.into_iter().filter(|r| readable.contains(&r.space)).collect();

        let mut short_term = self.memory.short_term(&self.local_session_id);
        for space in readable.iter().filter(|s| s.as_str() != self.local_session_id) {
            short_term.extend(self.memory.short_term(space));
        }

        let mut seen_ids: HashSet<u64> = HashSet::new();
        let mut seen_keys: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::with_capacity(limit);

        for rec in short_term.into_iter().chain(long_term.into_iter()) {
            let is_new = if rec.id != 0 {
                seen_ids.insert(rec.id)
            } else {
                seen_keys.insert((rec.session_id.clone(), rec.canonical_content_key()))
            };
            if is_new {
                out.push(rec);
            }
        }
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::DummyEmbedder;
    use crate::engine::OptionsBuilder;
    use crate::store::InMemoryStore;

    fn session(principal: &str, registry: Arc<SpaceRegistry>) -> SharedSession {
        let engine = Arc::new(Engine::new(Arc::new(InMemoryStore::new()), Arc::new(DummyEmbedder), OptionsBuilder::new().build().unwrap()));
        SharedSession::new(format!("{principal}-local"), principal, engine, registry, 8)
    }

    #[test]
    fn write_without_grant_is_forbidden() {
        let registry = Arc::new(SpaceRegistry::new());
        let now = Utc::now();
        registry.grant("team-a", "someone-else", Role::Reader, now, None);
        let s = session("alice", registry);
        s.join("team-a");
        let err = s.add_short_to("team-a", "note", now).unwrap_err();
        assert!(matches!(err, SharedSessionError::Space(SpaceError::Forbidden { .. })));
    }

    #[test]
    fn grant_allows_store_and_retrieve_across_the_space() {
        let registry = Arc::new(SpaceRegistry::new());
        let now = Utc::now();
        registry.grant("team-a", "alice", Role::Writer, now, None);
        registry.grant("team-a", "bob", Role::Reader, now, None);

        let engine = Arc::new(Engine::new(Arc::new(InMemoryStore::new()), Arc::new(DummyEmbedder), OptionsBuilder::new().build().unwrap()));
        let alice = SharedSession::new("alice-local", "alice", engine.clone(), registry.clone(), 8);
        let bob = SharedSession::new("bob-local", "bob", engine, registry, 8);
        alice.join("team-a");
        bob.join("team-a");

        let cancel = CancelToken::never();
        alice.store_long_to(&cancel, "team-a", "shared announcement about the outage", None, now).unwrap();

        let seen = bob.retrieve(&cancel, "outage announcement", 5, now).unwrap();
        assert!(seen.iter().any(|r| r.content.contains("announcement")));
    }

    #[test]
    fn retrieve_prefers_unflushed_short_term_over_long_term() {
        let registry = Arc::new(SpaceRegistry::new());
        let now = Utc::now();
        registry.grant("team-a", "alice", Role::Writer, now, None);
        let s = session("alice", registry);
        s.join("team-a");
        let cancel = CancelToken::never();

        s.store_long_to(&cancel, "team-a", "older shared note", None, now).unwrap();
        s.add_short_to("team-a", "freshest unflushed note", now).unwrap();

        let results = s.retrieve(&cancel, "note", 1, now).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "freshest unflushed note");
    }

    #[test]
    fn retrieve_includes_flushed_local_session_memory() {
        let registry = Arc::new(SpaceRegistry::new());
        let now = Utc::now();
        let s = session("alice", registry);
        let cancel = CancelToken::never();

        s.add_short_local("a private note about the quarterly budget", now);
        s.flush_local(&cancel).unwrap();

        let results = s.retrieve(&cancel, "quarterly budget", 5, now).unwrap();
        assert!(results.iter().any(|r| r.content.contains("quarterly budget")));
    }

    #[test]
    fn leaving_a_space_excludes_it_from_retrieval() {
        let registry = Arc::new(SpaceRegistry::new());
        let now = Utc::now();
        registry.grant("team-a", "alice", Role::Writer, now, None);
        let s = session("alice", registry);
        s.join("team-a");
        let cancel = CancelToken::never();
        s.store_long_to(&cancel, "team-a", "about to be unreachable", None, now).unwrap();
        s.leave("team-a");
        let results = s.retrieve(&cancel, "unreachable", 5, now).unwrap();
        assert!(results.is_empty());
    }
}
