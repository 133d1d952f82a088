//! Engram Core Benchmarks
//!
//! Benchmarks the hot path of retrieval: scoring, MMR selection, and a full
//! `Engine::retrieve` call against a populated in-memory store.
//! Run with: cargo bench -p engram-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use engram_core::{CancelToken, DummyEmbedder, Engine, InMemoryStore, OptionsBuilder};
use std::sync::Arc;

fn populated_engine(n: usize) -> Engine {
    let engine = Engine::new(Arc::new(InMemoryStore::new()), Arc::new(DummyEmbedder), OptionsBuilder::new().build().unwrap());
    let cancel = CancelToken::never();
    for i in 0..n {
        engine
            .store(&cancel, "bench-session", &format!("memory entry number {i} about topic {}", i % 13), None)
            .unwrap();
    }
    engine
}

fn bench_retrieve_small(c: &mut Criterion) {
    let engine = populated_engine(200);
    let cancel = CancelToken::never();
    c.bench_function("retrieve_200_candidates", |b| {
        b.iter(|| {
            black_box(engine.retrieve(&cancel, "topic 7 entry", 10).unwrap());
        })
    });
}

fn bench_retrieve_large(c: &mut Criterion) {
    let engine = populated_engine(2000);
    let cancel = CancelToken::never();
    c.bench_function("retrieve_2000_candidates", |b| {
        b.iter(|| {
            black_box(engine.retrieve(&cancel, "topic 7 entry", 10).unwrap());
        })
    });
}

fn bench_store_with_dedup_check(c: &mut Criterion) {
    let engine = populated_engine(500);
    let cancel = CancelToken::never();
    let mut i = 0usize;
    c.bench_function("store_against_500_existing", |b| {
        b.iter(|| {
            i += 1;
            black_box(engine.store(&cancel, "bench-session", &format!("brand new memory {i}"), None).unwrap());
        })
    });
}

criterion_group!(benches, bench_retrieve_small, bench_retrieve_large, bench_store_with_dedup_check);
criterion_main!(benches);
