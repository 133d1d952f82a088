//! Engine configuration (spec §4.1 "Options")

use crate::clock::{system_clock, Clock};
use chrono::Duration;
use std::collections::HashMap;

/// Per-axis weights for the hybrid score. Normalized so they sum to 1; if
/// all are zero, `normalized()` substitutes the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub similarity: f32,
    pub keywords: f32,
    pub importance: f32,
    pub recency: f32,
    pub source: f32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            keywords: 0.0,
            importance: 0.2,
            recency: 0.2,
            source: 0.1,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f32 {
        self.similarity + self.keywords + self.importance + self.recency + self.source
    }

    /// Divide every axis by the total so they sum to 1. Falls back to the
    /// defaults when every axis is zero.
    pub fn normalized(&self) -> Weights {
        let sum = self.sum();
        if sum <= 0.0 {
            return Weights::default().normalized();
        }
        Weights {
            similarity: self.similarity / sum,
            keywords: self.keywords / sum,
            importance: self.importance / sum,
            recency: self.recency / sum,
            source: self.source / sum,
        }
    }
}

/// Immutable engine configuration. Build via [`OptionsBuilder`].
#[derive(Clone)]
pub struct Options {
    pub weights: Weights,
    pub lambda_mmr: f32,
    pub half_life: Duration,
    pub cluster_similarity: f32,
    pub drift_threshold: f32,
    pub duplicate_similarity: f32,
    pub ttl: Option<Duration>,
    pub max_size: Option<usize>,
    pub source_boost: HashMap<String, f32>,
    pub enable_summaries: bool,
    pub graph_neighborhood_hops: u32,
    pub graph_neighborhood_limit: usize,
    pub enable_mcts: bool,
    pub mcts_simulations: usize,
    pub mcts_expansion: usize,
    pub mcts_max_depth: u32,
    pub mcts_exploration: f32,
    pub clock: Clock,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            lambda_mmr: 0.5,
            half_life: Duration::hours(24),
            cluster_similarity: 0.83,
            drift_threshold: 0.90,
            duplicate_similarity: 0.97,
            ttl: None,
            max_size: None,
            source_boost: HashMap::new(),
            enable_summaries: false,
            graph_neighborhood_hops: 0,
            graph_neighborhood_limit: 0,
            enable_mcts: false,
            mcts_simulations: 32,
            mcts_expansion: 4,
            mcts_max_depth: 2,
            mcts_exploration: 1.0,
            clock: system_clock(),
        }
    }
}

impl Options {
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        (self.clock)()
    }

    /// `sourceBoost[source] ?? sourceBoost["default"] ?? 1`, clamped to
    /// `[0, 1]` (spec §4.1 retrieve step 4).
    pub fn source_score(&self, source: &str) -> f32 {
        self.source_boost
            .get(source)
            .or_else(|| self.source_boost.get("default"))
            .copied()
            .unwrap_or(1.0)
            .clamp(0.0, 1.0)
    }
}

/// A configuration error surfaced immediately at construction (spec §7 kind
/// 1), never degraded or retried.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("lambda_mmr must be in [0, 1], got {0}")]
    InvalidLambda(f32),
    #[error("cluster_similarity must be in [0, 1], got {0}")]
    InvalidClusterSimilarity(f32),
    #[error("drift_threshold must be in [0, 1], got {0}")]
    InvalidDriftThreshold(f32),
    #[error("duplicate_similarity must be in [0, 1], got {0}")]
    InvalidDuplicateSimilarity(f32),
    #[error("weights must be non-negative")]
    NegativeWeight,
}

#[derive(Clone, Default)]
pub struct OptionsBuilder {
    opts: OptsInner,
}

/// Wraps `Options` with `Default` derivable via the real `Options::default`.
#[derive(Clone)]
struct OptsInner(Options);

impl Default for OptsInner {
    fn default() -> Self {
        OptsInner(Options::default())
    }
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weights(mut self, weights: Weights) -> Self {
        self.opts.0.weights = weights;
        self
    }

    pub fn lambda_mmr(mut self, v: f32) -> Self {
        self.opts.0.lambda_mmr = v;
        self
    }

    pub fn half_life(mut self, v: Duration) -> Self {
        self.opts.0.half_life = v;
        self
    }

    pub fn cluster_similarity(mut self, v: f32) -> Self {
        self.opts.0.cluster_similarity = v;
        self
    }

    pub fn drift_threshold(mut self, v: f32) -> Self {
        self.opts.0.drift_threshold = v;
        self
    }

    pub fn duplicate_similarity(mut self, v: f32) -> Self {
        self.opts.0.duplicate_similarity = v;
        self
    }

    pub fn ttl(mut self, v: Option<Duration>) -> Self {
        self.opts.0.ttl = v;
        self
    }

    pub fn max_size(mut self, v: Option<usize>) -> Self {
        self.opts.0.max_size = v;
        self
    }

    pub fn source_boost(mut self, v: HashMap<String, f32>) -> Self {
        self.opts.0.source_boost = v;
        self
    }

    pub fn enable_summaries(mut self, v: bool) -> Self {
        self.opts.0.enable_summaries = v;
        self
    }

    pub fn graph_neighborhood(mut self, hops: u32, limit: usize) -> Self {
        self.opts.0.graph_neighborhood_hops = hops;
        self.opts.0.graph_neighborhood_limit = limit;
        self
    }

    pub fn mcts(mut self, simulations: usize, expansion: usize, max_depth: u32, exploration: f32) -> Self {
        self.opts.0.enable_mcts = true;
        self.opts.0.mcts_simulations = simulations;
        self.opts.0.mcts_expansion = expansion;
        self.opts.0.mcts_max_depth = max_depth;
        self.opts.0.mcts_exploration = exploration;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.opts.0.clock = clock;
        self
    }

    pub fn build(self) -> Result<Options, ConfigError> {
        let opts = self.opts.0;
        if !(0.0..=1.0).contains(&opts.lambda_mmr) {
            return Err(ConfigError::InvalidLambda(opts.lambda_mmr));
        }
        if !(0.0..=1.0).contains(&opts.cluster_similarity) {
            return Err(ConfigError::InvalidClusterSimilarity(opts.cluster_similarity));
        }
        if !(0.0..=1.0).contains(&opts.drift_threshold) {
            return Err(ConfigError::InvalidDriftThreshold(opts.drift_threshold));
        }
        if !(0.0..=1.0).contains(&opts.duplicate_similarity) {
            return Err(ConfigError::InvalidDuplicateSimilarity(opts.duplicate_similarity));
        }
        let w = &opts.weights;
        if w.similarity < 0.0 || w.keywords < 0.0 || w.importance < 0.0 || w.recency < 0.0 || w.source < 0.0 {
            return Err(ConfigError::NegativeWeight);
        }
        Ok(opts)
    }
}
