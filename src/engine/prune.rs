//! Size/TTL pruning (spec §4.1 "Prune algorithm")

use crate::cancel::CancelToken;
use crate::engine::importance::compute_importance;
use crate::metrics::Metrics;
use crate::record::MemoryRecord;
use crate::store::VectorStore;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

const DELETE_BATCH: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneReport {
    pub ttl_expired: usize,
    pub duplicates_removed: usize,
    pub size_evicted: usize,
}

/// Single pass: TTL eviction, then canonical-content dedup (first occurrence
/// wins, scanned oldest-first), then size-bounded eviction by
/// `(age_hours + 1) * (1 - importance)` if still over `max_size`.
pub fn prune(
    store: &dyn VectorStore,
    cancel: &CancelToken,
    ttl: Option<Duration>,
    max_size: Option<usize>,
    now: DateTime<Utc>,
    metrics: &Metrics,
) -> crate::store::Result<PruneReport> {
    let mut report = PruneReport::default();
    let mut to_delete: Vec<u64> = Vec::new();
    let mut survivors: Vec<MemoryRecord> = Vec::new();
    let mut seen_content: HashSet<String> = HashSet::new();

    store.iterate(cancel, &mut |rec| {
        let ttl_expired = match ttl {
            Some(ttl) if rec.created_at.timestamp() != 0 => now - rec.created_at >= ttl,
            _ => false,
        };
        if ttl_expired {
            to_delete.push(rec.id);
            report.ttl_expired += 1;
            return true;
        }

        let key = rec.canonical_content_key();
        if !seen_content.insert(key) {
            to_delete.push(rec.id);
            report.duplicates_removed += 1;
            return true;
        }

        survivors.push(rec.clone());
        true
    })?;

    delete_in_batches(store, cancel, &to_delete)?;
    metrics.inc_ttl_expired_by(report.ttl_expired as u64);

    if let Some(max_size) = max_size {
        if survivors.len() > max_size {
            let overflow = survivors.len() - max_size;
            let worst = worst_by_prune_score(&survivors, now, overflow);
            report.size_evicted = worst.len();
            delete_in_batches(store, cancel, &worst)?;
            metrics.inc_size_evicted_by(worst.len() as u64);
        }
    }

    let total = (report.ttl_expired + report.duplicates_removed + report.size_evicted) as u64;
    metrics.inc_pruned_by(total);

    Ok(report)
}

fn delete_in_batches(store: &dyn VectorStore, cancel: &CancelToken, ids: &[u64]) -> crate::store::Result<()> {
    for batch in ids.chunks(DELETE_BATCH) {
        store.delete_memory(cancel, batch)?;
    }
    Ok(())
}

/// Keep a bounded min-heap of size `k` holding the largest prune scores
/// (i.e. the worst survivors), so only `k` scores are retained in memory
/// regardless of how many survivors there are.
fn worst_by_prune_score(survivors: &[MemoryRecord], now: DateTime<Utc>, k: usize) -> Vec<u64> {
    // Min-heap on score via Reverse, capped at size k: pushing past k pops
    // the smallest score, so what remains is the k largest (worst) scores.
    let mut heap: BinaryHeap<Reverse<(ordered_float::OrderedFloat<f32>, u64)>> = BinaryHeap::new();

    for rec in survivors {
        let importance = if rec.importance > 0.0 {
            rec.importance
        } else {
            compute_importance(0.0, &rec.content)
        };
        let age_hours = (now - rec.created_at).num_seconds() as f32 / 3600.0;
        let score = (age_hours.max(0.0) + 1.0) * (1.0 - importance);
        let entry = Reverse((ordered_float::OrderedFloat(score), rec.id));

        if heap.len() < k {
            heap.push(entry);
        } else if let Some(&Reverse((min_score, _))) = heap.peek() {
            if score > min_score.into_inner() {
                heap.pop();
                heap.push(entry);
            }
        }
    }

    heap.into_iter().map(|Reverse((_, id))| id).collect()
}

mod ordered_float {
    //! Minimal total-order wrapper for `f32` so it can live in a `BinaryHeap`.
    //! NaN never appears in prune scores (ages and importances are always
    //! finite), so `partial_cmp().unwrap()` is safe here.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OrderedFloat(pub f32);

    impl OrderedFloat {
        pub fn into_inner(self) -> f32 {
            self.0
        }
    }

    impl Eq for OrderedFloat {}
    impl PartialOrd for OrderedFloat {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for OrderedFloat {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}
