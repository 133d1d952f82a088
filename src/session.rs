//! Short-term ring buffers over a long-term store (spec §4.3)
//!
//! Every session gets a bounded `VecDeque` of recent turns that never
//! touches the vector store until flushed. `retrieve_context` blends
//! long-term recall with whatever is still sitting in the ring buffer, so a
//! turn is queryable the instant it's added even before it's embedded and
//! persisted.

use crate::cancel::CancelToken;
use crate::embedder::{embed_or_fallback, DummyEmbedder, Embedder};
use crate::engine::Engine;
use crate::record::MemoryRecord;
use crate::store::VectorStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Default number of turns kept per session before the oldest is evicted.
pub const DEFAULT_RING_CAPACITY: usize = 32;

pub struct SessionMemory {
    engine: Option<Arc<Engine>>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    ring_capacity: usize,
    short_term: RwLock<HashMap<String, VecDeque<MemoryRecord>>>,
}

impl SessionMemory {
    /// Build atop a fully configured [`Engine`]; flushes route through its
    /// `store` so dedup, summarization, and pruning all apply.
    pub fn with_engine(engine: Arc<Engine>, ring_capacity: usize) -> Self {
        Self {
            store: bare_store_handle(&engine),
            embedder: bare_embedder_handle(&engine),
            engine: Some(engine),
            ring_capacity,
            short_term: RwLock::new(HashMap::new()),
        }
    }

    /// Build atop a bare store, with no dedup/summarization/pruning on
    /// flush — just an embed-and-persist. Used when no [`Engine`] is
    /// configured; the embedder defaults to [`DummyEmbedder`] (spec §4.3
    /// "auto-selected from environment; falls back to deterministic
    /// dummy").
    pub fn with_store(store: Arc<dyn VectorStore>, embedder: Option<Arc<dyn Embedder>>, ring_capacity: usize) -> Self {
        Self {
            engine: None,
            store,
            embedder: embedder.unwrap_or_else(|| Arc::new(DummyEmbedder)),
            ring_capacity,
            short_term: RwLock::new(HashMap::new()),
        }
    }

    /// Append a turn to `session_id`'s ring buffer, evicting the oldest if
    /// at capacity. Never touches the long-term store.
    pub fn add_short_term(&self, session_id: &str, content: &str, now: DateTime<Utc>) -> MemoryRecord {
        let rec = MemoryRecord::new(session_id, content, now);
        let mut guard = self.short_term.write().unwrap();
        let ring = guard.entry(session_id.to_string()).or_default();
        if ring.len() >= self.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(rec.clone());
        rec
    }

    /// Current short-term buffer for `session_id`, oldest first.
    pub fn short_term(&self, session_id: &str) -> Vec<MemoryRecord> {
        self.short_term
            .read()
            .unwrap()
            .get(session_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist every buffered turn for `session_id` to the long-term store
    /// and clear the ring. Routes through the engine when configured (spec
    /// §4.1 store algorithm applies in full); otherwise embeds and persists
    /// directly.
    pub fn flush_to_long_term(&self, cancel: &CancelToken, session_id: &str) -> crate::store::Result<Vec<MemoryRecord>> {
        let turns = {
            let mut guard = self.short_term.write().unwrap();
            guard.remove(session_id).unwrap_or_default()
        };
        let mut persisted = Vec::with_capacity(turns.len());
        for turn in turns {
            let rec = match &self.engine {
                Some(engine) => engine
                    .store(cancel, session_id, &turn.content, None)
                    .map_err(|e| crate::store::StoreError::Backend(e.to_string()))?,
                None => {
                    let embedding = embed_or_fallback(self.embedder.as_ref(), &turn.content);
                    self.store.store_memory(cancel, session_id, session_id, &turn.content, None, embedding)?
                }
            };
            persisted.push(rec);
        }
        Ok(persisted)
    }

    /// Long-term search for `session_id`'s space, appended with whatever is
    /// still unflushed in the ring buffer (most recent last).
    pub fn retrieve_context(&self, cancel: &CancelToken, session_id: &str, query: &str, limit: usize) -> crate::store::Result<Vec<MemoryRecord>> {
        let mut out = match &self.engine {
            Some(engine) => engine
                .retrieve(cancel, query, limit)
                .map_err(|e| crate::store::StoreError::Backend(e.to_string()))?,
            None => {
                let embedding = embed_or_fallback(self.embedder.as_ref(), query);
                self.store.search_memory(cancel, &embedding, limit)?
            }
        };
        out.extend(self.short_term(session_id));
        Ok(out)
    }
}

/// Reach into an `Engine` for its store handle so `SessionMemory` can still
/// offer a direct `search_memory`/`store_memory` escape hatch alongside the
/// full `store`/`retrieve` path. `Engine` doesn't expose its store publicly
/// (callers should go through `store`/`retrieve`), so this clones the `Arc`
/// the engine was built with — safe since both point at the same backend.
fn bare_store_handle(engine: &Arc<Engine>) -> Arc<dyn VectorStore> {
    engine.store_handle()
}

fn bare_embedder_handle(engine: &Arc<Engine>) -> Arc<dyn Embedder> {
    engine.embedder_handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::DummyEmbedder;
    use crate::engine::{Engine, OptionsBuilder};
    use crate::store::InMemoryStore;

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let session = SessionMemory::with_store(Arc::new(InMemoryStore::new()), None, 2);
        let now = Utc::now();
        session.add_short_term("s1", "one", now);
        session.add_short_term("s1", "two", now);
        session.add_short_term("s1", "three", now);
        let ring = session.short_term("s1");
        assert_eq!(ring.len(), 2);
        assert_eq!(ring[0].content, "two");
        assert_eq!(ring[1].content, "three");
    }

    #[test]
    fn flush_persists_and_clears_the_ring() {
        let store = Arc::new(InMemoryStore::new());
        let session = SessionMemory::with_store(store.clone(), Some(Arc::new(DummyEmbedder)), 8);
        let cancel = CancelToken::never();
        session.add_short_term("s1", "remember this", Utc::now());

        let persisted = session.flush_to_long_term(&cancel, "s1").unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(store.count(&cancel).unwrap(), 1);
        assert!(session.short_term("s1").is_empty());
    }

    #[test]
    fn retrieve_context_includes_unflushed_turns() {
        let engine = Arc::new(Engine::new(Arc::new(InMemoryStore::new()), Arc::new(DummyEmbedder), OptionsBuilder::new().build().unwrap()));
        let session = SessionMemory::with_engine(engine, 8);
        let cancel = CancelToken::never();
        session.add_short_term("s1", "fresh turn never flushed", Utc::now());
        let context = session.retrieve_context(&cancel, "s1", "fresh turn", 5).unwrap();
        assert!(context.iter().any(|r| r.content == "fresh turn never flushed"));
    }
}
