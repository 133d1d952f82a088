//! The vector store contract (spec §4.2)
//!
//! A conforming backend implements the mandatory [`VectorStore`] operations
//! plus any number of optional capabilities ([`SchemaInitializer`],
//! [`GraphStore`], [`MultiVectorStore`]). The engine detects capabilities by
//! probing `as_graph_store()` etc. rather than by downcasting a concrete
//! type — duck-typed capabilities, modeled as an explicit capability set
//! (spec §9 "Duck-typed store capabilities").

mod memory;
#[cfg(feature = "sqlite-store")]
mod sqlite;
#[cfg(feature = "http-store")]
mod http;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;
#[cfg(feature = "http-store")]
pub use http::HttpStore;

use crate::cancel::CancelToken;
use crate::record::{GraphEdge, MemoryRecord};
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors a backend can surface. `#[non_exhaustive]` so new backend-specific
/// variants don't break downstream matches (mirrors the teacher's
/// `StorageError`/`VectorSearchError`).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("record not found: {0}")]
    NotFound(u64),
    #[error("capability not supported by this backend: {0}")]
    NotSupported(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[cfg(feature = "sqlite-store")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "http-store")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Mandatory operations every backend must implement.
pub trait VectorStore: Send + Sync {
    /// Persist a new memory, assigning it an id and normalizing its
    /// metadata (spec §4.6).
    fn store_memory(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        space: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        embedding: Vec<f32>,
    ) -> Result<MemoryRecord>;

    /// Ranked by cosine similarity descending; populates `score` on every
    /// returned record.
    fn search_memory(&self, cancel: &CancelToken, query_embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Fails with `NotFound` on an unknown id.
    fn update_embedding(
        &self,
        cancel: &CancelToken,
        id: u64,
        embedding: Vec<f32>,
        last_embedded: DateTime<Utc>,
    ) -> Result<()>;

    /// Idempotent bulk delete.
    fn delete_memory(&self, cancel: &CancelToken, ids: &[u64]) -> Result<()>;

    /// Oldest-first scan; halts as soon as `f` returns `false`.
    fn iterate(&self, cancel: &CancelToken, f: &mut dyn FnMut(&MemoryRecord) -> bool) -> Result<()>;

    fn count(&self, cancel: &CancelToken) -> Result<usize>;

    /// Capability probes. A backend overrides the ones it implements;
    /// absent capabilities return `None` and the engine treats them as
    /// `NotSupported`.
    fn as_schema_initializer(&self) -> Option<&dyn SchemaInitializer> {
        None
    }

    fn as_graph_store(&self) -> Option<&dyn GraphStore> {
        None
    }

    fn as_multi_vector(&self) -> Option<&dyn MultiVectorStore> {
        None
    }
}

/// Schema bootstrap for backends that need one (relational: extension,
/// table, indexes; HTTP: collection creation/reconciliation).
pub trait SchemaInitializer: Send + Sync {
    fn create_schema(&self, path: &str) -> Result<()>;
}

/// Knowledge-graph edges over stored memories.
pub trait GraphStore: Send + Sync {
    /// Replace all outgoing edges for `record_id` atomically. Readers either
    /// see the complete new edge set or the complete old one. Invalid edges
    /// are silently dropped (they should already be sanitized by the
    /// caller, but the store re-validates defensively).
    fn upsert_graph(&self, cancel: &CancelToken, record_id: u64, edges: &[GraphEdge]) -> Result<()>;

    /// BFS up to `hops`, returning at most `limit` distinct records
    /// excluding the seeds, preferring the shallowest path. Returns nothing
    /// when `hops == 0` (open question in spec §9, resolved: never include
    /// seeds).
    fn neighborhood(&self, cancel: &CancelToken, seeds: &[u64], hops: u32, limit: usize) -> Result<Vec<MemoryRecord>>;
}

/// Additional vectors per record (structural, keyword, ...) scored by
/// max-sim rather than plain cosine.
pub trait MultiVectorStore: Send + Sync {
    fn store_memory_multi(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        space: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<MemoryRecord>;

    fn search_memory_multi(&self, cancel: &CancelToken, query_embeddings: &[Vec<f32>], limit: usize) -> Result<Vec<MemoryRecord>>;
}
