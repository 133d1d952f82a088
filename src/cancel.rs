//! Cooperative cancellation
//!
//! The store, embedder, and summarizer calls are the only ones that may
//! perform I/O and therefore may block (spec §5). Every public engine method
//! accepts a `CancelToken`; backends check it at the top of each call and
//! bail out with `StoreError::Cancelled` rather than starting new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, clonable cancellation flag. Cloning shares the same underlying
/// flag, so cancelling one handle cancels every clone (and every child
/// created via [`CancelToken::child`]).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has fired.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A token that shares this one's cancellation state. Used when a
    /// deadline must propagate into a nested call (e.g. engine retrieve ->
    /// store search -> graph neighborhood).
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// A token that is never cancelled. Convenient for call sites that don't
    /// yet thread cancellation through (tests, simple CLIs).
    pub fn never() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let child = token.child();
        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());
    }
}
