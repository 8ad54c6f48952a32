use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use hashwheel::NULL_DEADLINE;
use hashwheel::table::SlotTable;
use std::hint::black_box;

/// Benchmark raw slot access
fn bench_slot_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_access");

    group.bench_function("set_read_clear_cycle", |b| {
        let mut table = SlotTable::new(256, 16);
        let mut spoke = 0usize;

        b.iter(|| unsafe {
            table.set_deadline(spoke, 0, 42);
            let d = table.deadline(spoke, 0);
            table.set_deadline(spoke, 0, NULL_DEADLINE);
            spoke = (spoke + 1) & 255;
            black_box(d)
        });
    });

    // Free-slot scan cost at increasing spoke fill
    for fill in [0usize, 4, 8, 15] {
        group.bench_with_input(BenchmarkId::new("first_free_slot", fill), &fill, |b, &fill| {
            let mut table = SlotTable::new(256, 16);
            for spoke in 0..256 {
                for slot in 0..fill {
                    unsafe { table.set_deadline(spoke, slot, 1) };
                }
            }
            let mut spoke = 0usize;

            b.iter(|| {
                let slot = unsafe { table.first_free_slot(spoke) };
                spoke = (spoke + 1) & 255;
                black_box(slot)
            });
        });
    }

    group.finish();
}

/// Benchmark doubling a fully occupied table
fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand");

    for allocation in [4usize, 16, 64] {
        group.bench_with_input(
            BenchmarkId::new("double", allocation),
            &allocation,
            |b, &allocation| {
                b.iter_batched_ref(
                    || {
                        let mut table = SlotTable::new(256, allocation);
                        for spoke in 0..256 {
                            for slot in 0..allocation {
                                unsafe {
                                    table.set_deadline(
                                        spoke,
                                        slot,
                                        (spoke * allocation + slot) as i64,
                                    )
                                };
                            }
                        }
                        table
                    },
                    |table| black_box(table.expand(0, 99).unwrap()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_slot_access, bench_expand);
criterion_main!(benches);
