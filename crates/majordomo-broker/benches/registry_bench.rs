// Criterion benchmarks for majordomo-broker
//
// Run benchmarks with:
//   cargo bench -p majordomo-broker
//
// For detailed output with plots:
//   cargo bench -p majordomo-broker -- --save-baseline main

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use majordomo_broker::{QueuedRequest, WorkerRegistry};
use majordomo_common::protocol::RequestId;
use std::time::Duration;
use tokio::time::Instant;

fn identity(n: u32) -> Bytes {
    let mut identity = [0u8; 5];
    identity[1..].copy_from_slice(&n.to_be_bytes());
    Bytes::copy_from_slice(&identity)
}

fn registry_with_workers(count: u32, now: Instant) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for n in 0..count {
        registry.register(identity(n), "echo", now).unwrap();
    }
    registry
}

fn request(n: u32, now: Instant) -> QueuedRequest {
    QueuedRequest {
        client: identity(u32::MAX - n),
        request_id: RequestId::new(),
        payload: Bytes::from_static(b"[\"echo\",[1,2,3],{}]"),
        queued_at: now,
    }
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");

    for count in [10u32, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let now = Instant::now();
            b.iter(|| black_box(registry_with_workers(count, now)));
        });
    }

    group.finish();
}

fn bench_dispatch_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_round_trip");

    for count in [2u32, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let now = Instant::now();
            let mut registry = registry_with_workers(count, now);
            let mut n = 0;
            b.iter(|| {
                let dispatch = registry.submit("echo", request(n, now)).unwrap();
                registry.release(black_box(&dispatch.worker), now);
                n = n.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_backlog_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("backlog_drain");

    group.bench_function("100_queued_1_worker", |b| {
        let now = Instant::now();
        b.iter(|| {
            let mut registry = WorkerRegistry::new();
            for n in 0..100 {
                registry.enqueue("echo", request(n, now));
            }
            registry.register(identity(0), "echo", now).unwrap();
            loop {
                let dispatched = registry.dispatch("echo");
                let Some(dispatch) = dispatched.first() else {
                    break;
                };
                registry.release(&dispatch.worker, now);
            }
        });
    });

    group.finish();
}

fn bench_purge_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("purge_expired");

    for count in [100u32, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let now = Instant::now();
            let later = now + Duration::from_secs(10);
            b.iter(|| {
                let mut registry = registry_with_workers(count, now);
                black_box(registry.purge_expired(later, Duration::from_secs(5)));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_register,
    bench_dispatch_round_trip,
    bench_backlog_drain,
    bench_purge_expired
);
criterion_main!(benches);
