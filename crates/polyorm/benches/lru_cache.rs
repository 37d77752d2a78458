//! Benchmark the in-memory result cache: hits, misses and stores that evict.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use polyorm::cache::cache_key;
use polyorm::{MemoryResultCache, ResultCache, Value};
use serde_json::json;
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(60);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

fn keys(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| cache_key(r#"SELECT * FROM "t" WHERE "id" = $1"#, &[Value::Int(i as i64)]))
        .collect()
}

async fn filled(capacity: usize) -> MemoryResultCache {
    let cache = MemoryResultCache::new(capacity);
    for key in keys(capacity) {
        cache.store_in_cache(&key, None, json!([]), TTL).await.unwrap();
    }
    cache
}

fn bench_hit(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("lru_cache/hit");

    for capacity in [64, 256, 1024] {
        let cache = rt.block_on(filled(capacity));
        let keys = keys(capacity);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(rt.block_on(cache.get_from_cache(key)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_miss(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("lru_cache/miss");

    for capacity in [64, 256, 1024] {
        let cache = rt.block_on(filled(capacity));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| black_box(rt.block_on(cache.get_from_cache("absent")).unwrap()));
        });
    }

    group.finish();
}

fn bench_store_with_eviction(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("lru_cache/store_evict");

    for capacity in [64, 256, 1024] {
        let cache = rt.block_on(filled(capacity));
        let fresh = keys(capacity * 4);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            let mut i = 0;
            b.iter(|| {
                let key = &fresh[i % fresh.len()];
                i += 1;
                rt.block_on(cache.store_in_cache(key, None, json!([{"id": i}]), TTL)).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hit, bench_miss, bench_store_with_eviction);
criterion_main!(benches);
