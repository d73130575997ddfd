use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use idempotency_engine::{
    CacheStats, DataRecord, Idempotency, IdempotencyConfig, InMemoryStore, KeyHasher, KeySelector,
    LocalCache,
};

fn nested_payload(fields: usize) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("orderId".to_string(), json!("order-42"));
    for i in 0..fields {
        body.insert(format!("field_{i}"), json!({"index": i, "amount": i * 100}));
    }
    json!({"body": Value::Object(body)})
}

fn benchmark_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    group.measurement_time(Duration::from_secs(10));

    let hasher = KeyHasher::new("process-order");

    group.bench_function("hash_client_key", |b| {
        b.iter(|| {
            let key = hasher.hash_client_key(black_box("order-42"));
            black_box(key)
        });
    });

    for size in [1, 16, 128].iter() {
        group.bench_with_input(
            BenchmarkId::new("hash_whole_payload", size),
            size,
            |b, &size| {
                let payload = nested_payload(size);
                b.iter(|| {
                    let key = hasher.hash_material(black_box(&payload));
                    black_box(key)
                });
            },
        );
    }

    group.finish();
}

fn benchmark_key_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_selection");

    let payload = nested_payload(32);

    group.bench_function("pointer_path", |b| {
        let selector = KeySelector::pointer("body.orderId");
        b.iter(|| {
            let selected = selector.select(black_box(&payload));
            black_box(selected)
        });
    });

    group.bench_function("whole_payload", |b| {
        let selector = KeySelector::WholePayload;
        b.iter(|| {
            let selected = selector.select(black_box(&payload));
            black_box(selected)
        });
    });

    group.finish();
}

fn benchmark_local_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_cache");

    let record = |key: &str| {
        DataRecord::completed(
            key.to_string(),
            Utc::now() + ChronoDuration::seconds(3600),
            "{\"total\":9.99}".to_string(),
            None,
        )
    };

    group.bench_function("get_hit", |b| {
        let cache = LocalCache::new(256);
        cache.put(record("warm"));
        let now = Utc::now();
        b.iter(|| {
            let hit = cache.get(black_box("warm"), now);
            black_box(hit)
        });
    });

    group.bench_function("put_with_eviction", |b| {
        let cache = LocalCache::new(256);
        for i in 0..256 {
            cache.put(record(&format!("seed-{i}")));
        }
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            cache.put(record(&format!("fresh-{counter}")));
        });
    });

    group.finish();
}

fn benchmark_cache_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_stats");

    group.bench_function("record_hit", |b| {
        let stats = CacheStats::new();
        b.iter(|| {
            stats.record_hit();
        });
    });

    group.bench_function("hit_rate_calculation", |b| {
        let stats = CacheStats::new();
        for _ in 0..1000 {
            stats.record_hit();
        }
        for _ in 0..100 {
            stats.record_miss();
        }

        b.iter(|| {
            let rate = stats.hit_rate();
            black_box(rate)
        });
    });

    group.finish();
}

fn benchmark_engine_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_replay");
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    #[derive(Debug, thiserror::Error)]
    #[error("unreachable")]
    struct Never;

    let engine = |cached: bool| {
        let mut config = IdempotencyConfig::new().with_key_path("body.orderId");
        if cached {
            config = config.with_local_cache(256);
        }
        Idempotency::new("bench", Arc::new(InMemoryStore::new()), config).expect("valid config")
    };

    let payload = nested_payload(16);

    // First call writes the record, every iteration after replays it; the
    // replay path dominates the measurement.
    group.bench_function("replay_from_store", |b| {
        let engine = engine(false);
        b.to_async(&runtime).iter(|| {
            engine.execute::<Value, Never, _, _>(black_box(&payload), || async {
                Ok(json!({"total": 9.99}))
            })
        });
    });

    group.bench_function("replay_from_local_cache", |b| {
        let engine = engine(true);
        b.to_async(&runtime).iter(|| {
            engine.execute::<Value, Never, _, _>(black_box(&payload), || async {
                Ok(json!({"total": 9.99}))
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_key_derivation,
    benchmark_key_selection,
    benchmark_local_cache,
    benchmark_cache_stats,
    benchmark_engine_replay,
);

criterion_main!(benches);
