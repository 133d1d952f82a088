//! Optional MCTS refinement over the knowledge graph (spec §4.1 step 6)
//!
//! UCT tree search rooted on a virtual parent, seeded with the MMR
//! selection. The RNG is seeded from the clock (spec §9 "MCTS
//! determinism") so runs are reproducible given the same clock and inputs;
//! it only breaks ties among children with equal UCT scores, so search
//! order is otherwise fully determined by the graph and the scoring
//! function.

use crate::record::MemoryRecord;
use crate::store::GraphStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

struct Node {
    record: Option<MemoryRecord>, // None only for the virtual root
    visits: u32,
    total_reward: f32,
    children: Vec<usize>,
    depth: u32,
}

impl Node {
    fn avg_reward(&self) -> f32 {
        if self.visits == 0 {
            0.0
        } else {
            self.total_reward / self.visits as f32
        }
    }
}

/// Run MCTS refinement starting from `seeds` (already MMR-selected records),
/// expanding via `graph.neighborhood`, scoring leaves with `score_fn`, and
/// returning up to `limit` visited non-root records ranked by average
/// reward (ties broken by weighted score, then recency).
pub fn mcts_refine(
    graph: &dyn GraphStore,
    cancel: &crate::cancel::CancelToken,
    seeds: Vec<MemoryRecord>,
    limit: usize,
    simulations: usize,
    expansion: usize,
    max_depth: u32,
    exploration: f32,
    seed: u64,
    score_fn: impl Fn(&MemoryRecord) -> f32,
) -> Vec<MemoryRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut arena: Vec<Node> = vec![Node {
        record: None,
        visits: 0,
        total_reward: 0.0,
        children: Vec::new(),
        depth: 0,
    }];
    let mut seen: HashSet<u64> = HashSet::new();

    for mut rec in seeds {
        if rec.id != 0 && !seen.insert(rec.id) {
            continue;
        }
        if rec.weighted_score == 0.0 {
            rec.weighted_score = score_fn(&rec);
        }
        let idx = arena.len();
        arena.push(Node {
            record: Some(rec),
            visits: 0,
            total_reward: 0.0,
            children: Vec::new(),
            depth: 1,
        });
        arena[0].children.push(idx);
    }

    for _ in 0..simulations {
        let mut path = vec![0usize];
        let mut node = 0usize;

        // Selection: descend while the node has children, preferring
        // unvisited ones, and stop once we hit a leaf or the depth cap.
        while !arena[node].children.is_empty() && arena[node].depth < max_depth {
            let children = arena[node].children.clone();
            let parent_visits = arena[node].visits.max(1);
            let unvisited: Vec<usize> = children.iter().copied().filter(|&c| arena[c].visits == 0).collect();
            let next = if !unvisited.is_empty() {
                unvisited[rng.gen_range(0..unvisited.len())]
            } else {
                let mut best = Vec::new();
                let mut best_uct = f32::NEG_INFINITY;
                for &c in &children {
                    let uct = arena[c].avg_reward()
                        + exploration * ((parent_visits as f32).ln() / arena[c].visits as f32).sqrt();
                    if uct > best_uct + 1e-9 {
                        best_uct = uct;
                        best = vec![c];
                    } else if (uct - best_uct).abs() <= 1e-9 {
                        best.push(c);
                    }
                }
                best[rng.gen_range(0..best.len())]
            };
            node = next;
            path.push(node);
        }

        // Expansion: pull graph neighbors of the selected leaf if it has
        // none yet and we haven't hit the depth cap.
        if arena[node].children.is_empty() && arena[node].depth < max_depth {
            if let Some(parent_record) = &arena[node].record {
                let parent_id = parent_record.id;
                let parent_depth = arena[node].depth;
                if parent_id != 0 {
                    if let Ok(neighbors) = graph.neighborhood(cancel, &[parent_id], 1, expansion) {
                        for mut nb in neighbors {
                            if !seen.insert(nb.id) {
                                continue;
                            }
                            if nb.weighted_score == 0.0 {
                                nb.weighted_score = score_fn(&nb);
                            }
                            let idx = arena.len();
                            arena.push(Node {
                                record: Some(nb),
                                visits: 0,
                                total_reward: 0.0,
                                children: Vec::new(),
                                depth: parent_depth + 1,
                            });
                            arena[node].children.push(idx);
                        }
                    }
                }
            }
        }

        // Pick the node to simulate/backprop: a fresh child if expansion
        // produced any, else the leaf itself.
        let sim_node = if let Some(&first_unvisited) = arena[node].children.iter().find(|&&c| arena[c].visits == 0) {
            path.push(first_unvisited);
            first_unvisited
        } else {
            node
        };

        let reward = arena[sim_node].record.as_ref().map(|r| r.weighted_score).unwrap_or(0.0);

        for &p in &path {
            arena[p].visits += 1;
            arena[p].total_reward += reward;
        }
    }

    let mut ranked: Vec<usize> = (1..arena.len()).collect();
    ranked.sort_by(|&a, &b| {
        let ra = &arena[a];
        let rb = &arena[b];
        rb.avg_reward()
            .partial_cmp(&ra.avg_reward())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let wa = ra.record.as_ref().map(|r| r.weighted_score).unwrap_or(0.0);
                let wb = rb.record.as_ref().map(|r| r.weighted_score).unwrap_or(0.0);
                wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                let ca = ra.record.as_ref().map(|r| r.created_at);
                let cb = rb.record.as_ref().map(|r| r.created_at);
                cb.cmp(&ca)
            })
    });

    ranked
        .into_iter()
        .filter_map(|i| arena[i].record.clone())
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::record::{EdgeType, GraphEdge, MemoryRecord};
    use crate::store::{InMemoryStore, VectorStore};
    use chrono::Utc;

    fn rec_with_id(store: &InMemoryStore, content: &str, importance: f32) -> MemoryRecord {
        let mut rec = store
            .store_memory(&CancelToken::never(), "s", "s", content, None, vec![])
            .unwrap();
        rec.importance = importance;
        rec
    }

    #[test]
    fn expands_through_graph_to_surface_a_hidden_high_value_node() {
        let store = InMemoryStore::new();
        let a = rec_with_id(&store, "core topic seed", 0.2);
        let b = rec_with_id(&store, "deep insight", 0.95);
        store
            .upsert_graph(&CancelToken::never(), a.id, &[GraphEdge::new(b.id, EdgeType::Follows).unwrap()])
            .unwrap();

        let graph = store.as_graph_store().unwrap();
        let score_fn = |r: &MemoryRecord| r.importance;

        let mut seed = a.clone();
        seed.weighted_score = 0.2;

        let result = mcts_refine(graph, &CancelToken::never(), vec![seed], 2, 64, 4, 2, 1.0, 42, score_fn);

        let ids: Vec<u64> = result.iter().map(|r| r.id).collect();
        assert!(ids.contains(&b.id), "expected MCTS to surface the linked high-importance node");
    }

    #[test]
    fn is_deterministic_for_a_fixed_seed() {
        let store = InMemoryStore::new();
        let a = rec_with_id(&store, "a", 0.3);
        let b = rec_with_id(&store, "b", 0.9);
        store
            .upsert_graph(&CancelToken::never(), a.id, &[GraphEdge::new(b.id, EdgeType::Follows).unwrap()])
            .unwrap();
        let graph = store.as_graph_store().unwrap();
        let score_fn = |r: &MemoryRecord| r.importance;
        let mut seed = a.clone();
        seed.weighted_score = 0.3;

        let r1 = mcts_refine(graph, &CancelToken::never(), vec![seed.clone()], 2, 16, 4, 2, 1.0, 7, score_fn);
        let r2 = mcts_refine(graph, &CancelToken::never(), vec![seed], 2, 16, 4, 2, 1.0, 7, score_fn);
        let ids1: Vec<u64> = r1.iter().map(|r| r.id).collect();
        let ids2: Vec<u64> = r2.iter().map(|r| r.id).collect();
        assert_eq!(ids1, ids2);
    }
}
