//! Search latency scaling: median search time should grow sub-linearly with
//! index size (roughly O(log n) expansion work per query).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use neurograph_core::HnswConfig;
use neurograph_vector::HnswIndex;
use uuid::Uuid;

const DIM: usize = 64;

fn vector_for(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| ((seed as f32 * 0.37 + i as f32 * 0.11).sin()))
        .collect()
}

fn build(n: u64) -> HnswIndex {
    let index = HnswIndex::new(HnswConfig::default(), DIM);
    for seed in 0..n {
        index.insert(Uuid::new_v4(), &vector_for(seed)).unwrap();
    }
    index
}

fn bench_search_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");
    group.sample_size(50);
    for n in [1_000u64, 10_000, 100_000] {
        let index = build(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &index, |b, index| {
            let mut seed = 0u64;
            b.iter(|| {
                seed = seed.wrapping_add(1);
                index.search(&vector_for(seed % n), 10, None).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("hnsw_insert_into_10k", |b| {
        let index = build(10_000);
        let mut seed = 10_000u64;
        b.iter(|| {
            seed += 1;
            index.insert(Uuid::new_v4(), &vector_for(seed)).unwrap()
        });
    });
}

criterion_group!(benches, bench_search_scaling, bench_insert);
criterion_main!(benches);
