//! Runtime counters
//!
//! Lock-free atomic counters exposed as a serializable snapshot, matching the
//! stable field names in spec §6 ("Metrics snapshot").

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the engine as it processes writes, reads, and
/// prune passes. Every field here is lock-free; there is no shared mutex.
#[derive(Debug, Default)]
pub struct Metrics {
    stored: AtomicU64,
    retrieved: AtomicU64,
    deduplicated: AtomicU64,
    reembedded: AtomicU64,
    pruned: AtomicU64,
    clusters_summarized: AtomicU64,
    ttl_expired: AtomicU64,
    size_evicted: AtomicU64,
    recency_samples: AtomicU64,
    /// Sum of recency decay values observed, stored as bits of an f64 so the
    /// running average can be computed lock-free in `snapshot`.
    recency_decay_sum_bits: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retrieved_by(&self, n: u64) {
        self.retrieved.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reembedded(&self) {
        self.reembedded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pruned_by(&self, n: u64) {
        self.pruned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_clusters_summarized(&self) {
        self.clusters_summarized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ttl_expired_by(&self, n: u64) {
        self.ttl_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_size_evicted_by(&self, n: u64) {
        self.size_evicted.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a recency-decay sample observed during scoring, folding it into
    /// the running average reported by `snapshot`.
    pub fn record_recency_decay(&self, decay: f64) {
        self.recency_samples.fetch_add(1, Ordering::Relaxed);
        loop {
            let current_bits = self.recency_decay_sum_bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let updated = (current + decay).to_bits();
            if self
                .recency_decay_sum_bits
                .compare_exchange_weak(current_bits, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// A point-in-time, serializable view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.recency_samples.load(Ordering::Relaxed);
        let sum = f64::from_bits(self.recency_decay_sum_bits.load(Ordering::Relaxed));
        let avg = if samples == 0 { 0.0 } else { sum / samples as f64 };
        MetricsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            retrieved: self.retrieved.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            reembedded: self.reembedded.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            clusters_summarized: self.clusters_summarized.load(Ordering::Relaxed),
            ttl_expired: self.ttl_expired.load(Ordering::Relaxed),
            size_evicted: self.size_evicted.load(Ordering::Relaxed),
            recency_samples: samples,
            recency_decay_avg: avg,
        }
    }
}

/// Stable, wire-friendly snapshot of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsSnapshot {
    pub stored: u64,
    pub retrieved: u64,
    pub deduplicated: u64,
    pub reembedded: u64,
    pub pruned: u64,
    pub clusters_summarized: u64,
    pub ttl_expired: u64,
    pub size_evicted: u64,
    pub recency_samples: u64,
    pub recency_decay_avg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_average_accumulates() {
        let m = Metrics::new();
        m.record_recency_decay(1.0);
        m.record_recency_decay(0.0);
        let snap = m.snapshot();
        assert_eq!(snap.recency_samples, 2);
        assert!((snap.recency_decay_avg - 0.5).abs() < 1e-9);
    }

    #[test]
    fn counters_start_at_zero() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.stored, 0);
        assert_eq!(snap.deduplicated, 0);
    }
}
