//! The retrieval/lifecycle engine (spec §4.1)
//!
//! Owns a single [`VectorStore`], an [`Embedder`], an optional
//! [`Summarizer`], and an immutable [`Options`]. `store` embeds,
//! deduplicates, optionally summarizes, persists, and prunes; `retrieve`
//! scores, diversifies (MMR), optionally refines via MCTS over the
//! knowledge graph, drift-checks embeddings, and re-attaches summaries.

pub mod importance;
mod mcts;
mod mmr;
pub mod options;
mod prune;

pub use options::{ConfigError, Options, OptionsBuilder, Weights};
pub use prune::PruneReport;

use crate::cancel::CancelToken;
use crate::embedder::{embed_or_fallback, Embedder};
use crate::metadata::{self, cosine_similarity};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::record::MemoryRecord;
use crate::store::{StoreError, VectorStore};
use crate::summarizer::{single_link_clusters, Summarizer};
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub struct Engine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Option<Arc<dyn Summarizer>>,
    options: Options,
    metrics: Metrics,
}

impl Engine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, options: Options) -> Self {
        Self {
            store,
            embedder,
            summarizer: None,
            options,
            metrics: Metrics::new(),
        }
    }

    /// Attach a summarizer. Forces `enable_summaries` on, per spec §4.1
    /// ("forced on when a summarizer is explicitly set").
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self.options.enable_summaries = true;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The backing store, for callers (e.g. `SessionMemory`) that need a
    /// bare `VectorStore` handle alongside the full `store`/`retrieve`
    /// pipeline.
    pub fn store_handle(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    pub fn embedder_handle(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn store(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<MemoryRecord> {
        let now = self.options.now();
        let embedding = embed_or_fallback(self.embedder.as_ref(), content);

        let norm = metadata::normalize_metadata(metadata.as_ref(), now);
        let space = metadata
            .as_ref()
            .and_then(|m| m.get("space"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| session_id.to_string());
        let importance = importance::compute_importance(norm.importance, content);

        // Step 3: dedup against the five nearest existing candidates.
        let candidates = self.store.search_memory(cancel, &embedding, 5)?;
        if let Some(dup) = candidates.iter().find(|c| c.score >= self.options.duplicate_similarity) {
            self.metrics.inc_deduplicated();
            return Ok(dup.clone());
        }

        // Step 4: optional cluster summary, computed before persisting.
        let mut summary = norm.summary.clone();
        if self.options.enable_summaries {
            if let Some(summarizer) = &self.summarizer {
                let mut pool = self.store.search_memory(cancel, &embedding, 32).unwrap_or_default();
                let mut provisional = MemoryRecord::new(session_id, content, now);
                provisional.embedding = embedding.clone();
                pool.push(provisional);
                let new_idx = pool.len() - 1;
                let clusters = single_link_clusters(&pool, self.options.cluster_similarity);
                if let Some(cluster) = clusters.iter().find(|c| c.contains(&new_idx)) {
                    let members: Vec<MemoryRecord> = cluster.iter().map(|&i| pool[i].clone()).collect();
                    match summarizer.summarize(&members) {
                        Ok(s) => {
                            self.metrics.inc_clusters_summarized();
                            summary = Some(s);
                        }
                        Err(e) => tracing::warn!("summarizer failed, omitting summary: {e}"),
                    }
                }
            }
        }

        // Step 2/5: assemble final metadata and persist.
        let mut meta = serde_json::Map::new();
        meta.insert("importance".to_string(), serde_json::Value::from(importance));
        meta.insert("source".to_string(), serde_json::Value::from(norm.source.clone()));
        meta.insert("space".to_string(), serde_json::Value::from(space.clone()));
        if let Some(s) = &summary {
            meta.insert("summary".to_string(), serde_json::Value::from(s.clone()));
        }
        meta.insert(
            "graph_edges".to_string(),
            serde_json::Value::Array(
                norm.graph_edges
                    .iter()
                    .map(|e| serde_json::json!({"target": e.target, "type": e.edge_type.as_str()}))
                    .collect(),
            ),
        );
        let meta_value = serde_json::Value::Object(meta);

        let record = self
            .store
            .store_memory(cancel, session_id, &space, content, Some(&meta_value), embedding)?;

        // Step 6: graph upsert, best-effort.
        if let Some(graph) = self.store.as_graph_store() {
            if let Err(e) = graph.upsert_graph(cancel, record.id, &norm.graph_edges) {
                tracing::warn!("graph upsert failed for record {}: {e}", record.id);
            }
        }

        self.metrics.inc_stored();

        // Step 7: prune. Backend errors here propagate like any other store error.
        self.prune(cancel)?;

        Ok(record)
    }

    pub fn retrieve(&self, cancel: &CancelToken, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.options.now();
        let query_embedding = embed_or_fallback(self.embedder.as_ref(), query);
        let weights = self.options.weights.normalized();

        let mut candidates = self.store.search_memory(cancel, &query_embedding, 4 * limit)?;

        if self.options.graph_neighborhood_limit > 0 {
            if let Some(graph) = self.store.as_graph_store() {
                let seeds: Vec<u64> = candidates.iter().map(|c| c.id).filter(|&id| id != 0).collect();
                if !seeds.is_empty() {
                    match graph.neighborhood(
                        cancel,
                        &seeds,
                        self.options.graph_neighborhood_hops,
                        self.options.graph_neighborhood_limit,
                    ) {
                        Ok(extra) => merge_dedup(&mut candidates, extra),
                        Err(e) => tracing::warn!("graph neighborhood expansion failed: {e}"),
                    }
                }
            }
        }

        for c in &mut candidates {
            let sim = cosine_similarity(&query_embedding, &c.embedding);
            let recency = recency_decay(now - c.created_at, self.options.half_life);
            self.metrics.record_recency_decay(recency as f64);
            let source_score = self.options.source_score(&c.source);
            let keyword = if weights.keywords > 0.0 { keyword_score(query, &c.content) } else { 0.0 };
            c.score = sim;
            c.weighted_score = weights.similarity * sim
                + weights.keywords * keyword
                + weights.importance * c.importance
                + weights.recency * recency
                + weights.source * source_score;
        }

        let mmr_indices = mmr::mmr_select(&candidates, limit, self.options.lambda_mmr);
        let mut selected: Vec<MemoryRecord> = mmr_indices.iter().map(|&i| candidates[i].clone()).collect();

        if self.options.enable_mcts {
            if let Some(graph) = self.store.as_graph_store() {
                let seed = now.timestamp_nanos_opt().unwrap_or(0) as u64;
                let score_fn = |r: &MemoryRecord| {
                    if r.weighted_score != 0.0 {
                        r.weighted_score
                    } else {
                        let sim = cosine_similarity(&query_embedding, &r.embedding);
                        let recency = recency_decay(now - r.created_at, self.options.half_life);
                        let source_score = self.options.source_score(&r.source);
                        weights.similarity * sim + weights.importance * r.importance + weights.recency * recency + weights.source * source_score
                    }
                };
                let refined = mcts::mcts_refine(
                    graph,
                    cancel,
                    selected.clone(),
                    limit,
                    self.options.mcts_simulations,
                    self.options.mcts_expansion,
                    self.options.mcts_max_depth,
                    self.options.mcts_exploration,
                    seed,
                    score_fn,
                );
                // `refined` is already ranked by the search; splice it in
                // ahead of the MMR selection rather than appending, so a
                // graph-discovered node that outranks an MMR pick isn't
                // immediately cut back off by the final truncation below.
                let mut reordered = refined;
                merge_dedup(&mut reordered, selected);
                selected = reordered;
            }
        }

        for rec in &mut selected {
            if rec.id == 0 {
                continue;
            }
            if now - rec.last_embedded >= self.options.half_life {
                let fresh = embed_or_fallback(self.embedder.as_ref(), &rec.content);
                let sim_to_stored = cosine_similarity(&fresh, &rec.embedding);
                if sim_to_stored < self.options.drift_threshold {
                    match self.store.update_embedding(cancel, rec.id, fresh.clone(), now) {
                        Ok(()) => {
                            rec.embedding = fresh;
                            rec.last_embedded = now;
                            self.metrics.inc_reembedded();
                        }
                        Err(e) => tracing::warn!("drift re-embed failed for record {}: {e}", rec.id),
                    }
                }
            }
        }

        if self.options.enable_summaries {
            if let Some(summarizer) = &self.summarizer {
                let clusters = single_link_clusters(&selected, self.options.cluster_similarity);
                for cluster in clusters {
                    let members: Vec<MemoryRecord> = cluster.iter().map(|&i| selected[i].clone()).collect();
                    match summarizer.summarize(&members) {
                        Ok(summary) => {
                            self.metrics.inc_clusters_summarized();
                            for &i in &cluster {
                                selected[i].summary = Some(summary.clone());
                            }
                        }
                        Err(e) => tracing::warn!("cluster summarization failed: {e}"),
                    }
                }
            }
        }

        selected.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.weighted_score.partial_cmp(&a.weighted_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        selected.truncate(limit);

        self.metrics.inc_retrieved_by(selected.len() as u64);
        Ok(selected)
    }

    pub fn prune(&self, cancel: &CancelToken) -> Result<PruneReport> {
        let now = self.options.now();
        let report = prune::prune(
            self.store.as_ref(),
            cancel,
            self.options.ttl,
            self.options.max_size,
            now,
            &self.metrics,
        )?;
        Ok(report)
    }
}

/// `0.5 ^ (age / half_life)`, clamped to `[0, 1]`. A non-positive half-life
/// degenerates to a step function (no decay until past the instant, then
/// zero), matching the limit of the formula.
fn recency_decay(age: Duration, half_life: Duration) -> f32 {
    if half_life <= Duration::zero() {
        return if age <= Duration::zero() { 1.0 } else { 0.0 };
    }
    let ratio = age.num_milliseconds() as f32 / half_life.num_milliseconds() as f32;
    (0.5f32).powf(ratio).clamp(0.0, 1.0)
}

/// Lexical-overlap score: Jaccard similarity of lower-cased whitespace
/// tokens between `query` and `content`.
fn keyword_score(query: &str, content: &str) -> f32 {
    let q: HashSet<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    let c: HashSet<String> = content.to_lowercase().split_whitespace().map(str::to_string).collect();
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    let intersection = q.intersection(&c).count();
    let union = q.union(&c).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Merge `new_items` into `existing`, deduping by id when non-zero, else by
/// `(session_id, trimmed content)`.
fn merge_dedup(existing: &mut Vec<MemoryRecord>, new_items: Vec<MemoryRecord>) {
    let mut seen_ids: HashSet<u64> = HashSet::new();
    let mut seen_keys: HashSet<(String, String)> = HashSet::new();
    for r in existing.iter() {
        if r.id != 0 {
            seen_ids.insert(r.id);
        } else {
            seen_keys.insert((r.session_id.clone(), r.canonical_content_key()));
        }
    }
    for item in new_items {
        let is_new = if item.id != 0 {
            seen_ids.insert(item.id)
        } else {
            seen_keys.insert((item.session_id.clone(), item.canonical_content_key()))
        };
        if is_new {
            existing.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::DummyEmbedder;
    use crate::store::InMemoryStore;

    fn engine_with(options: Options) -> Engine {
        Engine::new(Arc::new(InMemoryStore::new()), Arc::new(DummyEmbedder), options)
    }

    #[test]
    fn recency_decay_is_one_at_zero_age() {
        assert!((recency_decay(Duration::zero(), Duration::hours(1)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn recency_decay_is_half_at_one_half_life() {
        let d = recency_decay(Duration::hours(1), Duration::hours(1));
        assert!((d - 0.5).abs() < 1e-3);
    }

    #[test]
    fn keyword_score_rewards_overlap() {
        let s = keyword_score("production issue", "a major production issue happened");
        assert!(s > 0.0);
        let none = keyword_score("production issue", "lunch plans");
        assert_eq!(none, 0.0);
    }

    #[test]
    fn store_then_retrieve_round_trips() {
        let engine = engine_with(OptionsBuilder::new().build().unwrap());
        let cancel = CancelToken::never();
        let rec = engine.store(&cancel, "s1", "Critical production outage", None).unwrap();
        assert!(rec.id != 0);
        assert!(rec.importance > 0.0);

        let results = engine.retrieve(&cancel, "production outage", 5).unwrap();
        assert!(results.iter().any(|r| r.id == rec.id));
        assert_eq!(engine.metrics().stored, 1);
    }

    #[test]
    fn duplicate_store_is_suppressed() {
        let engine = engine_with(OptionsBuilder::new().duplicate_similarity(0.97).build().unwrap());
        let cancel = CancelToken::never();
        let first = engine.store(&cancel, "s1", "System upgrade completed", None).unwrap();
        let second = engine.store(&cancel, "s1", "System upgrade completed", None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(engine.metrics().deduplicated, 1);
    }

    #[test]
    fn empty_limit_returns_nothing() {
        let engine = engine_with(OptionsBuilder::new().build().unwrap());
        let cancel = CancelToken::never();
        engine.store(&cancel, "s", "content", None).unwrap();
        assert!(engine.retrieve(&cancel, "content", 0).unwrap().is_empty());
    }
}
