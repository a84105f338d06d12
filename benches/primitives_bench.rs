//! Benchmark suite for the blocking primitives.
//!
//! Benchmarks the uncontended hot paths:
//! - Gate: acquire/release round trip, fair and unfair
//! - BoundedQueue: put/take round trip
//! - PermitGate: acquire/release round trip
//! - CountdownLatch: count_down on a positive count

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use gatesync::{BoundedQueue, CountdownLatch, Gate, PermitGate};

fn bench_gate(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate");
    group.throughput(Throughput::Elements(1));

    group.bench_function("unfair_acquire_release", |b| {
        let gate = Gate::new();
        b.iter(|| {
            gate.acquire();
            black_box(&gate).release().expect("owner release");
        });
    });

    group.bench_function("fair_acquire_release", |b| {
        let gate = Gate::new_fair();
        b.iter(|| {
            gate.acquire();
            black_box(&gate).release().expect("owner release");
        });
    });

    group.bench_function("reentrant_acquire_release", |b| {
        let gate = Gate::new();
        gate.acquire();
        b.iter(|| {
            gate.acquire();
            black_box(&gate).release().expect("owner release");
        });
        gate.release().expect("owner release");
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_take_roundtrip", |b| {
        let queue = BoundedQueue::new(64);
        b.iter(|| {
            queue.put(black_box(1u64));
            black_box(queue.take());
        });
    });

    group.bench_function("try_put_try_take", |b| {
        let queue = BoundedQueue::new(64);
        b.iter(|| {
            queue.try_put(black_box(1u64)).expect("space free");
            black_box(queue.try_take().expect("item present"));
        });
    });

    group.finish();
}

fn bench_permits(c: &mut Criterion) {
    let mut group = c.benchmark_group("permits");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_release", |b| {
        let permits = PermitGate::new(8);
        b.iter(|| {
            permits.acquire();
            black_box(&permits).release().expect("release");
        });
    });

    group.bench_function("fair_acquire_release", |b| {
        let permits = PermitGate::new_fair(8);
        b.iter(|| {
            permits.acquire();
            black_box(&permits).release().expect("release");
        });
    });

    group.finish();
}

fn bench_latch(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("count_down", |b| {
        b.iter_with_setup(
            || CountdownLatch::new(u32::MAX as usize),
            |latch| {
                latch.count_down();
                black_box(latch);
            },
        );
    });

    group.finish();
}

criterion_group!(benches, bench_gate, bench_queue, bench_permits, bench_latch);
criterion_main!(benches);
