//! Reference in-memory `VectorStore` implementation
//!
//! A `BTreeMap` keyed by id (so iteration is naturally oldest-first, since
//! ids are assigned monotonically), a monotonic counter, and a read-write
//! lock. Reads clone embedding/matrix slices so callers can't observe or
//! corrupt internal state through a returned record (spec §4.2 "Reference
//! in-memory implementation").

use super::{GraphStore, MultiVectorStore, Result, SchemaInitializer, StoreError, VectorStore};
use crate::cancel::CancelToken;
use crate::metadata::{self, cosine_similarity, max_cosine_similarity};
use crate::record::{GraphEdge, MemoryRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<u64, MemoryRecord>>,
    /// Adjacency list, owned by the store; each edge list is cloned on read.
    edges: RwLock<HashMap<u64, Vec<GraphEdge>>>,
    next_id: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn insert(&self, session_id: &str, space: &str, content: &str, metadata: Option<&serde_json::Value>, embedding: Vec<f32>) -> MemoryRecord {
        let now = Utc::now();
        let norm = metadata::normalize_metadata(metadata, now);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let rec = MemoryRecord {
            id,
            session_id: session_id.to_string(),
            space: space.to_string(),
            content: content.to_string(),
            metadata: norm.json.clone(),
            embedding,
            multi_embeddings: norm.multi_embeddings.clone(),
            importance: norm.importance,
            source: norm.source.clone(),
            summary: norm.summary.clone(),
            created_at: now,
            last_embedded: norm.last_embedded,
            graph_edges: norm.graph_edges.clone(),
            score: 0.0,
            weighted_score: 0.0,
        };
        self.records.write().unwrap().insert(id, rec.clone());
        rec
    }
}

impl VectorStore for InMemoryStore {
    fn store_memory(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        space: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        embedding: Vec<f32>,
    ) -> Result<MemoryRecord> {
        Self::check(cancel)?;
        Ok(self.insert(session_id, space, content, metadata, embedding))
    }

    fn search_memory(&self, cancel: &CancelToken, query_embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        let guard = self.records.read().unwrap();
        let mut scored: Vec<MemoryRecord> = guard
            .values()
            .map(|r| {
                let mut r = r.clone();
                r.score = cosine_similarity(query_embedding, &r.embedding);
                r
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn update_embedding(&self, cancel: &CancelToken, id: u64, embedding: Vec<f32>, last_embedded: DateTime<Utc>) -> Result<()> {
        Self::check(cancel)?;
        let mut guard = self.records.write().unwrap();
        match guard.get_mut(&id) {
            Some(rec) => {
                rec.embedding = embedding;
                rec.last_embedded = last_embedded;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn delete_memory(&self, cancel: &CancelToken, ids: &[u64]) -> Result<()> {
        Self::check(cancel)?;
        let mut guard = self.records.write().unwrap();
        for id in ids {
            guard.remove(id);
        }
        let mut edges = self.edges.write().unwrap();
        for id in ids {
            edges.remove(id);
        }
        Ok(())
    }

    fn iterate(&self, cancel: &CancelToken, f: &mut dyn FnMut(&MemoryRecord) -> bool) -> Result<()> {
        Self::check(cancel)?;
        let snapshot: Vec<MemoryRecord> = self.records.read().unwrap().values().cloned().collect();
        for rec in &snapshot {
            if !f(rec) {
                break;
            }
        }
        Ok(())
    }

    fn count(&self, cancel: &CancelToken) -> Result<usize> {
        Self::check(cancel)?;
        Ok(self.records.read().unwrap().len())
    }

    fn as_graph_store(&self) -> Option<&dyn GraphStore> {
        Some(self)
    }

    fn as_multi_vector(&self) -> Option<&dyn MultiVectorStore> {
        Some(self)
    }

    fn as_schema_initializer(&self) -> Option<&dyn SchemaInitializer> {
        None
    }
}

impl GraphStore for InMemoryStore {
    fn upsert_graph(&self, cancel: &CancelToken, record_id: u64, edges: &[GraphEdge]) -> Result<()> {
        Self::check(cancel)?;
        let sanitized: Vec<GraphEdge> = edges.iter().filter(|e| e.target != 0).copied().collect();
        self.edges.write().unwrap().insert(record_id, sanitized);
        Ok(())
    }

    fn neighborhood(&self, cancel: &CancelToken, seeds: &[u64], hops: u32, limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        if hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let edges = self.edges.read().unwrap();
        let records = self.records.read().unwrap();

        let mut visited: std::collections::HashSet<u64> = seeds.iter().copied().collect();
        let mut frontier: VecDeque<(u64, u32)> = seeds.iter().map(|&s| (s, 0)).collect();
        let mut out: Vec<MemoryRecord> = Vec::new();

        while let Some((node, depth)) = frontier.pop_front() {
            if out.len() >= limit {
                break;
            }
            if depth >= hops {
                continue;
            }
            let Some(neighbors) = edges.get(&node) else {
                continue;
            };
            for edge in neighbors {
                if visited.contains(&edge.target) {
                    continue;
                }
                visited.insert(edge.target);
                if let Some(rec) = records.get(&edge.target) {
                    out.push(rec.clone());
                    if out.len() >= limit {
                        break;
                    }
                }
                frontier.push_back((edge.target, depth + 1));
            }
        }
        Ok(out)
    }
}

impl MultiVectorStore for InMemoryStore {
    fn store_memory_multi(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        space: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<MemoryRecord> {
        Self::check(cancel)?;
        let primary = embeddings.first().cloned().unwrap_or_default();
        let mut rec = self.insert(session_id, space, content, metadata, primary);
        rec.multi_embeddings = embeddings.into_iter().skip(1).collect();
        self.records.write().unwrap().insert(rec.id, rec.clone());
        Ok(rec)
    }

    fn search_memory_multi(&self, cancel: &CancelToken, query_embeddings: &[Vec<f32>], limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        let guard = self.records.read().unwrap();
        let mut scored: Vec<MemoryRecord> = guard
            .values()
            .map(|r| {
                let mut r = r.clone();
                let all: Vec<Vec<f32>> = r.all_embeddings().cloned().collect();
                r.score = max_cosine_similarity(query_embeddings, &all);
                r
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancelToken {
        CancelToken::never()
    }

    #[test]
    fn store_then_search_finds_it() {
        let store = InMemoryStore::new();
        let rec = store
            .store_memory(&token(), "s1", "s1", "hello", None, vec![1.0, 0.0, 0.0])
            .unwrap();
        assert_ne!(rec.id, 0);
        let found = store.search_memory(&token(), &[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(found[0].id, rec.id);
        assert!((found[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn update_embedding_unknown_id_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_embedding(&token(), 999, vec![1.0], Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(999)));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        let rec = store.store_memory(&token(), "s", "s", "x", None, vec![1.0]).unwrap();
        store.delete_memory(&token(), &[rec.id]).unwrap();
        store.delete_memory(&token(), &[rec.id]).unwrap();
        assert_eq!(store.count(&token()).unwrap(), 0);
    }

    #[test]
    fn iterate_is_oldest_first() {
        let store = InMemoryStore::new();
        let a = store.store_memory(&token(), "s", "s", "a", None, vec![]).unwrap();
        let b = store.store_memory(&token(), "s", "s", "b", None, vec![]).unwrap();
        let mut seen = Vec::new();
        store
            .iterate(&token(), &mut |r| {
                seen.push(r.id);
                true
            })
            .unwrap();
        assert_eq!(seen, vec![a.id, b.id]);
    }

    #[test]
    fn neighborhood_excludes_seeds_and_respects_hops() {
        let store = InMemoryStore::new();
        let a = store.store_memory(&token(), "s", "s", "a", None, vec![]).unwrap();
        let b = store.store_memory(&token(), "s", "s", "b", None, vec![]).unwrap();
        let c = store.store_memory(&token(), "s", "s", "c", None, vec![]).unwrap();
        store
            .upsert_graph(&token(), a.id, &[GraphEdge::new(b.id, crate::record::EdgeType::Follows).unwrap()])
            .unwrap();
        store
            .upsert_graph(&token(), b.id, &[GraphEdge::new(c.id, crate::record::EdgeType::Follows).unwrap()])
            .unwrap();

        let zero_hop = store.neighborhood(&token(), &[a.id], 0, 10).unwrap();
        assert!(zero_hop.is_empty());

        let one_hop = store.neighborhood(&token(), &[a.id], 1, 10).unwrap();
        assert_eq!(one_hop.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);

        let two_hop = store.neighborhood(&token(), &[a.id], 2, 10).unwrap();
        let ids: std::collections::HashSet<u64> = two_hop.iter().map(|r| r.id).collect();
        assert!(ids.contains(&b.id));
        assert!(ids.contains(&c.id));
    }
}
