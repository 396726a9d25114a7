use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vindex_core::config::Mode;
use vindex_core::engine::HnswIndex;

const DIM: usize = 128;
const DATASET_SIZE: u32 = 10_000;

fn random_vectors(count: u32, dim: usize, seed: u64) -> Vec<Vec<i8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| (0..dim).map(|_| rng.gen_range(i8::MIN..=i8::MAX)).collect()).collect()
}

fn build_index(capacity: u32) -> HnswIndex {
    let params = Mode::Balanced.resolve();
    let mut index = HnswIndex::new();
    index.update_config(DIM, params.m, params.ef_construction).unwrap();
    index.init_index(capacity).unwrap();
    index.seed_rng(7);
    index
}

fn bench_bulk_insert(c: &mut Criterion) {
    let dataset = random_vectors(DATASET_SIZE, DIM, 1);

    c.bench_function("hnsw_insert_10k", |b| {
        b.iter(|| {
            let mut index = build_index(DATASET_SIZE);
            for (id, vector) in dataset.iter().enumerate() {
                index.insert(id as u32, vector).unwrap();
            }
        });
    });
}

fn bench_incremental_insert(c: &mut Criterion) {
    let dataset = random_vectors(DATASET_SIZE, DIM, 1);
    let extra = random_vectors(1, DIM, 2);

    c.bench_function("hnsw_incremental_insert", |b| {
        b.iter_batched(
            || {
                let mut index = build_index(DATASET_SIZE + 1);
                for (id, vector) in dataset.iter().enumerate() {
                    index.insert(id as u32, vector).unwrap();
                }
                index
            },
            |mut index| {
                index.insert(DATASET_SIZE, black_box(&extra[0])).unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let dataset = random_vectors(DATASET_SIZE, DIM, 1);
    let queries = random_vectors(8, DIM, 3);

    let mut index = build_index(DATASET_SIZE);
    for (id, vector) in dataset.iter().enumerate() {
        index.insert(id as u32, vector).unwrap();
    }
    index.update_search_config(64);

    c.bench_function("hnsw_search_k10", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let query = &queries[i % queries.len()];
            i += 1;
            black_box(index.search(query, 10));
        });
    });
}

criterion_group!(benches, bench_bulk_insert, bench_incremental_insert, bench_search);
criterion_main!(benches);
