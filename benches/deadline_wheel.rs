use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use hashwheel::DeadlineWheel;
use std::hint::black_box;

const RESOLUTION: i64 = 1 << 20;

/// Benchmark schedule and cancel in steady state
fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");

    // Happy path: empty spoke, first slot free
    group.bench_function("schedule_cancel_cycle", |b| {
        let mut wheel = DeadlineWheel::new(0, RESOLUTION, 1024).unwrap();
        let mut deadline = RESOLUTION;

        b.iter(|| {
            let id = wheel.schedule(deadline).unwrap();
            wheel.cancel(id);
            deadline += RESOLUTION;
            black_box(id)
        });
    });

    // Half-full spoke: the free-slot scan has to walk past live timers
    group.bench_function("schedule_into_deep_spoke", |b| {
        let mut wheel = DeadlineWheel::with_allocation(0, RESOLUTION, 1024, 32).unwrap();
        for _ in 0..16 {
            wheel.schedule(RESOLUTION).unwrap();
        }

        b.iter(|| {
            let id = wheel.schedule(RESOLUTION).unwrap();
            wheel.cancel(id);
            black_box(id)
        });
    });

    group.finish();
}

/// Benchmark realistic polling patterns
fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");

    // One tick advanced per call, nothing due
    group.bench_function("poll_idle_tick", |b| {
        let mut wheel = DeadlineWheel::new(0, RESOLUTION, 1024).unwrap();
        // A single far-future timer keeps the spoke scan on the hot path
        // instead of the empty-wheel shortcut.
        wheel.schedule(1 << 40).unwrap();
        let mut now = 0;

        b.iter(|| {
            now += RESOLUTION;
            black_box(wheel.poll(now, usize::MAX, |_, _, _| true))
        });
    });

    // Schedule a timer, let it expire on the next poll
    group.bench_function("schedule_fire_cycle", |b| {
        let mut wheel = DeadlineWheel::new(0, RESOLUTION, 1024).unwrap();
        let mut now = 0;

        b.iter(|| {
            wheel.schedule(now + RESOLUTION).unwrap();
            now += 2 * RESOLUTION;
            black_box(wheel.poll(now, usize::MAX, |_, _, _| true))
        });
    });

    // Burst expiry: a full spoke drained by one call
    group.bench_function("drain_64_same_tick", |b| {
        b.iter_batched_ref(
            || {
                let mut wheel = DeadlineWheel::with_allocation(0, RESOLUTION, 1024, 64).unwrap();
                for _ in 0..64 {
                    wheel.schedule(RESOLUTION).unwrap();
                }
                wheel
            },
            |wheel| black_box(wheel.poll(2 * RESOLUTION, usize::MAX, |_, _, _| true)),
            BatchSize::SmallInput,
        );
    });

    // Same burst split across calls by the expiry limit
    group.bench_function("drain_64_limit_8", |b| {
        b.iter_batched_ref(
            || {
                let mut wheel = DeadlineWheel::with_allocation(0, RESOLUTION, 1024, 64).unwrap();
                for _ in 0..64 {
                    wheel.schedule(RESOLUTION).unwrap();
                }
                wheel
            },
            |wheel| {
                let mut total = 0;
                while total < 64 {
                    total += wheel.poll(2 * RESOLUTION, 8, |_, _, _| true);
                }
                black_box(total)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark iteration over a populated wheel
fn bench_iter(c: &mut Criterion) {
    let mut group = c.benchmark_group("iter");

    group.bench_function("iter_1024_timers", |b| {
        let mut wheel = DeadlineWheel::new(0, RESOLUTION, 1024).unwrap();
        for i in 0..1024i64 {
            wheel.schedule(i * RESOLUTION).unwrap();
        }

        b.iter(|| black_box(wheel.iter().count()));
    });

    group.finish();
}

criterion_group!(benches, bench_schedule, bench_poll, bench_iter);
criterion_main!(benches);
