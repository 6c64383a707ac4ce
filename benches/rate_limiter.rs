//! Benchmarks for limiter admission overhead
//!
//! This benchmark measures:
//! - Uncontended `try_acquire` on a single bucket
//! - Composite admission across several buckets
//! - Preset lookup by name

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gcp_ratelimit::{CompositeLimiter, RateLimiter, RateLimiterConfig, RateLimiterPreset};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_try_acquire(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("try_acquire");
    group.throughput(Throughput::Elements(1));

    // High refill so the bucket never runs dry during the measurement.
    let limiter = RateLimiter::new(RateLimiterConfig::new(1e12, 1e12));
    group.bench_function("single_bucket", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(limiter.try_acquire(black_box(1.0)).await) })
    });

    for members in [2usize, 4, 8] {
        let composite = CompositeLimiter::new(
            (0..members)
                .map(|_| Arc::new(RateLimiter::new(RateLimiterConfig::new(1e12, 1e12))))
                .collect(),
        );
        group.bench_with_input(
            BenchmarkId::new("composite", members),
            &composite,
            |b, composite| {
                b.to_async(&rt)
                    .iter(|| async { black_box(composite.try_acquire(black_box(1.0)).await) })
            },
        );
    }

    group.finish();
}

fn bench_rejection(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("rejection");

    let empty = RateLimiter::new(RateLimiterConfig::new(0.0, 10.0).with_initial_tokens(0.0));
    group.bench_function("empty_bucket", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(empty.try_acquire(black_box(1.0)).await) })
    });

    // first member admits, second rejects, first is refunded
    let composite = CompositeLimiter::new(vec![
        Arc::new(RateLimiter::new(RateLimiterConfig::new(1e12, 1e12))),
        Arc::new(RateLimiter::new(
            RateLimiterConfig::new(0.0, 10.0).with_initial_tokens(0.0),
        )),
    ]);
    group.bench_function("composite_rollback", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(composite.try_acquire(black_box(1.0)).await) })
    });

    group.finish();
}

fn bench_preset_lookup(c: &mut Criterion) {
    c.bench_function("preset_from_name", |b| {
        b.iter(|| RateLimiterPreset::from_name(black_box("compute_engine_api")))
    });
}

criterion_group!(
    benches,
    bench_try_acquire,
    bench_rejection,
    bench_preset_lookup,
);
criterion_main!(benches);
