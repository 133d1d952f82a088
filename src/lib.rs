//! # Engram Core
//!
//! A hybrid retrieval layer for conversational agent memories: vector
//! similarity, importance, recency decay, and source trust combined into a
//! single weighted score, diversified with Maximal Marginal Relevance, and
//! optionally refined by Monte Carlo Tree Search over a knowledge graph of
//! related memories.
//!
//! ## Quick start
//!
//! ```rust
//! use engram_core::{CancelToken, Engine, InMemoryStore, DummyEmbedder, OptionsBuilder};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(DummyEmbedder),
//!     OptionsBuilder::new().build().unwrap(),
//! );
//! let cancel = CancelToken::never();
//! engine.store(&cancel, "session-1", "The deploy pipeline broke at 2am", None).unwrap();
//! let hits = engine.retrieve(&cancel, "deploy pipeline issue", 5).unwrap();
//! assert!(!hits.is_empty());
//! ```
//!
//! ## Store backends
//!
//! [`InMemoryStore`] is always available. `sqlite-store` and `http-store`
//! (both on by default) add [`SqliteStore`] and [`HttpStore`] respectively —
//! every backend implements the same [`VectorStore`] contract plus whatever
//! optional capabilities it supports ([`GraphStore`], [`SchemaInitializer`],
//! [`MultiVectorStore`]), probed rather than downcast.
//!
//! ## Multi-tenancy
//!
//! [`SessionMemory`] buffers recent turns per session before they're
//! embedded and persisted. [`SharedSession`] layers role-based access
//! control ([`SpaceRegistry`]) over a set of joined namespaces so several
//! participants can read and write a shared pool of long-term memory.

// ============================================================================
// MODULES
// ============================================================================

pub mod cancel;
pub mod clock;
pub mod embedder;
pub mod engine;
pub mod metadata;
pub mod metrics;
pub mod record;
pub mod session;
pub mod shared_session;
pub mod space;
pub mod store;
pub mod summarizer;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use cancel::CancelToken;
pub use clock::{fixed_clock, system_clock, Clock};

pub use embedder::{embed_or_fallback, fallback_embedding, DummyEmbedder, EmbedError, Embedder, EMBEDDING_DIMENSIONS};

pub use engine::{ConfigError, Engine, EngineError, Options, OptionsBuilder, PruneReport, Weights};

pub use metadata::{cosine_similarity, max_cosine_similarity, hydrate_record_from_metadata, normalize_metadata, NormalizedMetadata};

pub use metrics::{Metrics, MetricsSnapshot};

pub use record::{EdgeType, GraphEdge, MemoryRecord};

pub use session::{SessionMemory, DEFAULT_RING_CAPACITY};

pub use shared_session::{SharedSession, SharedSessionError};

pub use space::{Role, Space, SpaceError, SpaceRegistry};

pub use store::{GraphStore, MultiVectorStore, Result as StoreResult, SchemaInitializer, StoreError, VectorStore};
#[cfg(feature = "sqlite-store")]
pub use store::SqliteStore;
#[cfg(feature = "http-store")]
pub use store::HttpStore;
pub use store::InMemoryStore;

pub use summarizer::{single_link_clusters, ConcatSummarizer, SummarizeError, Summarizer};

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        CancelToken, Clock, DummyEmbedder, EdgeType, Embedder, Engine, EngineError, GraphEdge,
        InMemoryStore, MemoryRecord, Options, OptionsBuilder, Role, SessionMemory, SharedSession,
        Space, SpaceRegistry, VectorStore, Weights,
    };

    #[cfg(feature = "sqlite-store")]
    pub use crate::SqliteStore;
    #[cfg(feature = "http-store")]
    pub use crate::HttpStore;
}
