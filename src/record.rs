//! The canonical memory unit
//!
//! `MemoryRecord` is produced by `Engine::store`, scored and filtered by
//! `Engine::retrieve`, and persisted verbatim (content) / mutated in place
//! (embedding, summary) by the store backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The relationship a graph edge encodes between two memories.
///
/// `#[non_exhaustive]` so a backend can add edge kinds later without
/// breaking callers that match on this enum — mirrors the teacher's
/// `NodeType` (`memory/node.rs`).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Follows,
    Explains,
    Contradicts,
    DerivedFrom,
}

impl EdgeType {
    /// Parse from the wire name, returning `None` for anything unrecognized
    /// so callers can drop the edge during sanitization instead of failing
    /// the whole write.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "follows" => Some(Self::Follows),
            "explains" => Some(Self::Explains),
            "contradicts" => Some(Self::Contradicts),
            "derived_from" | "derivedFrom" => Some(Self::DerivedFrom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follows => "follows",
            Self::Explains => "explains",
            Self::Contradicts => "contradicts",
            Self::DerivedFrom => "derived_from",
        }
    }
}

/// A directed edge in the knowledge graph. Valid iff `target != 0` and
/// `edge_type` is one of the enumerated constants (spec §3 invariants) —
/// invalid edges never make it into a `GraphEdge`, they're dropped during
/// sanitization before one is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub target: u64,
    pub edge_type: EdgeType,
}

impl GraphEdge {
    pub fn new(target: u64, edge_type: EdgeType) -> Option<Self> {
        if target == 0 {
            return None;
        }
        Some(Self { target, edge_type })
    }
}

/// The canonical memory unit stored and retrieved by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Monotonic per-store identifier. Zero means "unpersisted".
    pub id: u64,
    /// The originating writer's session string.
    pub session_id: String,
    /// Logical namespace; defaults to `session_id` when absent.
    pub space: String,
    /// The text content. Immutable once written.
    pub content: String,
    /// Opaque JSON persisted verbatim alongside the hydrated fields below.
    pub metadata: String,
    /// Primary dense vector.
    pub embedding: Vec<f32>,
    /// Additional vectors for colbert-style max-sim retrieval.
    pub multi_embeddings: Vec<Vec<f32>>,
    /// Intrinsic importance in `[0, 1]`.
    pub importance: f32,
    pub source: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_embedded: DateTime<Utc>,
    pub graph_edges: Vec<GraphEdge>,

    /// Transient per-query relevance score (e.g. cosine to the query).
    #[serde(skip)]
    pub score: f32,
    /// Transient per-query weighted combination (spec §4.1 step 4).
    #[serde(skip)]
    pub weighted_score: f32,
}

impl MemoryRecord {
    /// A freshly constructed, unpersisted record. `id` is `0` until a store
    /// backend assigns one.
    pub fn new(session_id: impl Into<String>, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let session_id = session_id.into();
        Self {
            id: 0,
            space: session_id.clone(),
            session_id,
            content: content.into(),
            metadata: "{}".to_string(),
            embedding: Vec::new(),
            multi_embeddings: Vec::new(),
            importance: 0.0,
            source: "default".to_string(),
            summary: None,
            created_at: now,
            last_embedded: now,
            graph_edges: Vec::new(),
            score: 0.0,
            weighted_score: 0.0,
        }
    }

    /// All embedding vectors (primary plus any auxiliary ones), for
    /// max-sim / colbert-style scoring.
    pub fn all_embeddings(&self) -> impl Iterator<Item = &Vec<f32>> {
        std::iter::once(&self.embedding).chain(self.multi_embeddings.iter())
    }

    /// The canonical content key used for dedup during prune: trimmed and
    /// lower-cased.
    pub fn canonical_content_key(&self) -> String {
        self.content.trim().to_lowercase()
    }
}
