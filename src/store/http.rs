//! HTTP vector-DB backend (Qdrant-style collections, spec §6)
//!
//! Points are `{id: Uuid, vector, payload: {session_id, space, content,
//! metadata, importance, source, summary, graph_edges, created_at,
//! last_embedded}}` — the scoring fields a conforming backend needs to
//! answer `search_memory`/`iterate` live in the payload, not just the
//! opaque `metadata` blob. The engine's contract uses monotonic `u64` ids
//! regardless of backend, so
//! this store keeps a bidirectional id map — the same `key_to_id`/
//! `id_to_key` pattern the teacher's HNSW index uses in `search/vector.rs`,
//! just fronting a remote UUID keyspace instead of a local one.
//!
//! Only pure request/response-shaping logic is unit tested here; nothing in
//! this crate's test suite talks to a real network.

use super::{Result, SchemaInitializer, StoreError, VectorStore};
use crate::cancel::CancelToken;
use crate::record::MemoryRecord;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub struct HttpStore {
    base_url: String,
    collection: String,
    client: Client,
    key_to_id: Mutex<HashMap<Uuid, u64>>,
    id_to_key: Mutex<HashMap<u64, Uuid>>,
    next_id: AtomicU64,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            collection: collection.into(),
            client: Client::new(),
            key_to_id: Mutex::new(HashMap::new()),
            id_to_key: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn check(cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn points_url(&self) -> String {
        format!("{}/points", self.collection_url())
    }

    /// Non-2xx responses whose body mentions "already exists" are treated as
    /// success for schema creation — collection creation is idempotent.
    fn is_idempotent_success(status_is_success: bool, body: &str) -> bool {
        status_is_success || body.to_lowercase().contains("already exists")
    }

    fn create_collection_body(dimensions: usize) -> serde_json::Value {
        json!({ "vectors": { "size": dimensions, "distance": "Cosine" } })
    }

    fn assign_local_id(&self, key: Uuid) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.key_to_id.lock().unwrap().insert(key, id);
        self.id_to_key.lock().unwrap().insert(id, key);
        id
    }

    fn key_for(&self, id: u64) -> Option<Uuid> {
        self.id_to_key.lock().unwrap().get(&id).copied()
    }

    fn search_body(query_embedding: &[f32], limit: usize) -> serde_json::Value {
        json!({ "vector": query_embedding, "limit": limit, "with_payload": true, "with_vector": true })
    }

    /// Rebuild a `MemoryRecord` from one `/points/search` hit. Returns `None`
    /// if the point's id was never minted by this store (the remote
    /// collection holds points this process never wrote to) or its payload
    /// is missing required fields — both are dropped rather than surfaced
    /// as errors, since a partial remote result set is still useful.
    fn record_from_point(&self, id: Uuid, score: f32, payload: &serde_json::Value, vector: Vec<f32>) -> Option<MemoryRecord> {
        let local_id = *self.key_to_id.lock().unwrap().get(&id)?;
        let session_id = payload.get("session_id")?.as_str()?.to_string();
        let space = payload.get("space")?.as_str()?.to_string();
        let content = payload.get("content")?.as_str()?.to_string();
        let metadata = payload.get("metadata").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
        let importance = payload.get("importance").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        let source = payload.get("source").and_then(|v| v.as_str()).unwrap_or("default").to_string();
        let summary = payload.get("summary").and_then(|v| v.as_str()).map(str::to_string);
        let graph_edges = payload
            .get("graph_edges")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| {
                        let target = e.get("target")?.as_u64()?;
                        let ty = e.get("type")?.as_str()?;
                        crate::record::GraphEdge::new(target, crate::record::EdgeType::parse(ty)?)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let created_at = payload
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let last_embedded = payload
            .get("last_embedded")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(created_at);
        Some(MemoryRecord {
            id: local_id,
            session_id,
            space,
            content,
            metadata,
            embedding: vector,
            multi_embeddings: Vec::new(),
            importance,
            source,
            summary,
            created_at,
            last_embedded,
            graph_edges,
            score,
            weighted_score: 0.0,
        })
    }
}

impl SchemaInitializer for HttpStore {
    fn create_schema(&self, _path: &str) -> Result<()> {
        let body = Self::create_collection_body(crate::embedder::EMBEDDING_DIMENSIONS);
        let resp = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .map_err(StoreError::from)?;
        let status_ok = resp.status().is_success();
        let text = resp.text().unwrap_or_default();
        if Self::is_idempotent_success(status_ok, &text) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("collection creation failed: {text}")))
        }
    }
}

impl VectorStore for HttpStore {
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
        let now = Utc::now();
        let norm = crate::metadata::normalize_metadata(metadata, now);
        let key = Uuid::new_v4();
        let payload = json!({
            "session_id": session_id,
            "space": space,
            "content": content,
            "metadata": norm.json,
            "importance": norm.importance,
            "source": norm.source,
            "summary": norm.summary,
            "graph_edges": norm.graph_edges.iter().map(|e| json!({"target": e.target, "type": e.edge_type.as_str()})).collect::<Vec<_>>(),
            "created_at": now.to_rfc3339(),
            "last_embedded": norm.last_embedded.to_rfc3339(),
        });
        let body = json!({ "points": [{ "id": key.to_string(), "vector": embedding, "payload": payload }] });
        self.client
            .put(self.points_url())
            .json(&body)
            .send()
            .map_err(StoreError::from)?;
        let id = self.assign_local_id(key);
        Ok(MemoryRecord {
            id,
            session_id: session_id.to_string(),
            space: space.to_string(),
            content: content.to_string(),
            metadata: norm.json,
            embedding,
            multi_embeddings: norm.multi_embeddings,
            importance: norm.importance,
            source: norm.source,
            summary: norm.summary,
            created_at: now,
            last_embedded: norm.last_embedded,
            graph_edges: norm.graph_edges,
            score: 0.0,
            weighted_score: 0.0,
        })
    }

    fn search_memory(&self, cancel: &CancelToken, query_embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        let body = Self::search_body(query_embedding, limit);
        let resp = self
            .client
            .post(format!("{}/search", self.points_url()))
            .json(&body)
            .send()
            .map_err(StoreError::from)?;
        if !resp.status().is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(StoreError::Backend(format!("search failed: {text}")));
        }
        let parsed: serde_json::Value = resp.json().map_err(StoreError::from)?;
        let hits = parsed.get("result").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let records = hits
            .into_iter()
            .filter_map(|hit| {
                let id = hit.get("id")?.as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
                let payload = hit.get("payload")?;
                let vector = hit
                    .get("vector")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|f| f.as_f64().map(|f| f as f32)).collect())
                    .unwrap_or_default();
                self.record_from_point(id, score, payload, vector)
            })
            .collect();
        Ok(records)
    }

    fn update_embedding(&self, cancel: &CancelToken, id: u64, embedding: Vec<f32>, last_embedded: DateTime<Utc>) -> Result<()> {
        Self::check(cancel)?;
        let key = self.key_for(id).ok_or(StoreError::NotFound(id))?;
        let vector_body = json!({ "points": [{ "id": key.to_string(), "vector": embedding }] });
        self.client
            .put(format!("{}/vectors", self.points_url()))
            .json(&vector_body)
            .send()
            .map_err(StoreError::from)?;
        let payload_body = json!({
            "points": [key.to_string()],
            "payload": { "last_embedded": last_embedded.to_rfc3339() },
        });
        self.client
            .post(format!("{}/payload", self.points_url()))
            .json(&payload_body)
            .send()
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn delete_memory(&self, cancel: &CancelToken, ids: &[u64]) -> Result<()> {
        Self::check(cancel)?;
        let keys: Vec<Uuid> = ids.iter().filter_map(|id| self.key_for(*id)).collect();
        if keys.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": keys.iter().map(Uuid::to_string).collect::<Vec<_>>() });
        self.client
            .post(format!("{}/delete", self.points_url()))
            .json(&body)
            .send()
            .map_err(StoreError::from)?;
        let mut key_to_id = self.key_to_id.lock().unwrap();
        let mut id_to_key = self.id_to_key.lock().unwrap();
        for id in ids {
            if let Some(key) = id_to_key.remove(id) {
                key_to_id.remove(&key);
            }
        }
        Ok(())
    }

    /// Pages through the collection via `/points/scroll`, then sorts the
    /// full result by `created_at` to honor the oldest-first contract —
    /// Qdrant's scroll order is by point id, not insertion time.
    fn iterate(&self, cancel: &CancelToken, f: &mut dyn FnMut(&MemoryRecord) -> bool) -> Result<()> {
        Self::check(cancel)?;
        let mut records = Vec::new();
        let mut offset: Option<serde_json::Value> = None;
        loop {
            Self::check(cancel)?;
            let mut body = json!({ "limit": 256, "with_payload": true, "with_vector": true });
            if let Some(o) = &offset {
                body["offset"] = o.clone();
            }
            let resp = self
                .client
                .post(format!("{}/scroll", self.points_url()))
                .json(&body)
                .send()
                .map_err(StoreError::from)?;
            if !resp.status().is_success() {
                let text = resp.text().unwrap_or_default();
                return Err(StoreError::Backend(format!("scroll failed: {text}")));
            }
            let parsed: serde_json::Value = resp.json().map_err(StoreError::from)?;
            let result = parsed.get("result").cloned().unwrap_or_default();
            let points = result.get("points").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for point in &points {
                let id = point.get("id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
                let payload = point.get("payload").cloned();
                let vector = point
                    .get("vector")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|f| f.as_f64().map(|f| f as f32)).collect::<Vec<f32>>());
                if let (Some(id), Some(payload), Some(vector)) = (id, payload, vector) {
                    if let Some(rec) = self.record_from_point(id, 0.0, &payload, vector) {
                        records.push(rec);
                    }
                }
            }
            offset = result.get("next_page_offset").filter(|v| !v.is_null()).cloned();
            if offset.is_none() || points.is_empty() {
                break;
            }
        }
        records.sort_by_key(|r| r.created_at);
        for rec in &records {
            if !f(rec) {
                break;
            }
        }
        Ok(())
    }

    fn count(&self, cancel: &CancelToken) -> Result<usize> {
        Self::check(cancel)?;
        Ok(self.key_to_id.lock().unwrap().len())
    }

    fn as_schema_initializer(&self) -> Option<&dyn SchemaInitializer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_under_the_collection() {
        let store = HttpStore::new("http://localhost:6333", "memories");
        assert_eq!(store.collection_url(), "http://localhost:6333/collections/memories");
        assert_eq!(store.points_url(), "http://localhost:6333/collections/memories/points");
    }

    #[test]
    fn already_exists_body_is_treated_as_success() {
        assert!(HttpStore::is_idempotent_success(false, "Collection `memories` already exists!"));
        assert!(HttpStore::is_idempotent_success(true, ""));
        assert!(!HttpStore::is_idempotent_success(false, "internal error"));
    }

    #[test]
    fn id_mapping_round_trips() {
        let store = HttpStore::new("http://localhost:6333", "memories");
        let key = Uuid::new_v4();
        let id = store.assign_local_id(key);
        assert_eq!(store.key_for(id), Some(key));
        assert_eq!(store.key_for(id + 1), None);
    }

    #[test]
    fn collection_body_uses_cosine_distance() {
        let body = HttpStore::create_collection_body(768);
        assert_eq!(body["vectors"]["distance"], "Cosine");
        assert_eq!(body["vectors"]["size"], 768);
    }

    #[test]
    fn search_body_requests_payload_and_vector() {
        let body = HttpStore::search_body(&[1.0, 0.0], 5);
        assert_eq!(body["vector"], json!([1.0, 0.0]));
        assert_eq!(body["limit"], 5);
        assert_eq!(body["with_payload"], true);
        assert_eq!(body["with_vector"], true);
    }

    #[test]
    fn record_from_point_rebuilds_a_known_point() {
        let store = HttpStore::new("http://localhost:6333", "memories");
        let key = Uuid::new_v4();
        let local_id = store.assign_local_id(key);
        let payload = json!({
            "session_id": "s1",
            "space": "s1",
            "content": "hello",
            "metadata": "{}",
            "importance": 0.7,
            "source": "default",
            "summary": null,
            "graph_edges": [],
            "created_at": "2024-01-01T00:00:00Z",
            "last_embedded": "2024-01-01T00:00:00Z",
        });
        let rec = store.record_from_point(key, 0.9, &payload, vec![1.0, 2.0]).unwrap();
        assert_eq!(rec.id, local_id);
        assert_eq!(rec.content, "hello");
        assert_eq!(rec.score, 0.9);
        assert!((rec.importance - 0.7).abs() < 1e-6);
        assert_eq!(rec.embedding, vec![1.0, 2.0]);
    }

    #[test]
    fn record_from_point_drops_an_unmapped_id() {
        let store = HttpStore::new("http://localhost:6333", "memories");
        let unknown = Uuid::new_v4();
        let payload = json!({ "session_id": "s1", "space": "s1", "content": "hello" });
        assert!(store.record_from_point(unknown, 0.0, &payload, vec![]).is_none());
    }
}
