//! Time source abstraction
//!
//! Every time-dependent operation (TTL expiry, recency decay, drift checks)
//! reads the current time through a `Clock` rather than calling `Utc::now()`
//! directly, so tests can swap in a fixed or stepped time source.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A injectable time source. Default is `Utc::now`.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The default clock, backed by the system wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Build a clock that always returns a fixed instant. Useful for deterministic
/// tests; combine with `advance` helpers in test code by constructing a new
/// fixed clock at the desired instant.
pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
