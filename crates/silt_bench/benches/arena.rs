//! Arena allocation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use silt_arena::{Arena, LARGE_THRESHOLD};

/// Benchmark standard-path allocations, 256 per fresh arena so block
/// rollover is exercised without unbounded growth.
fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_allocate_256");

    for size in [8usize, 64, 256, 1024].iter() {
        group.throughput(Throughput::Bytes((size * 256) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || Arena::new().unwrap(),
                |arena| {
                    for _ in 0..256 {
                        black_box(arena.allocate(black_box(size)).unwrap());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark aligned allocations of odd sizes.
fn bench_allocate_aligned(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_allocate_aligned_256");

    for size in [13usize, 100, 1023].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || Arena::new().unwrap(),
                |arena| {
                    for _ in 0..256 {
                        black_box(arena.allocate_aligned(black_box(size)).unwrap());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark the dedicated-block path for oversized requests.
fn bench_allocate_large(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_allocate_large");
    group.throughput(Throughput::Bytes((LARGE_THRESHOLD + 1) as u64 * 16));

    group.bench_function("16_blocks", |b| {
        b.iter_batched(
            || Arena::new().unwrap(),
            |arena| {
                for _ in 0..16 {
                    black_box(arena.allocate(LARGE_THRESHOLD + 1).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_allocate, bench_allocate_aligned, bench_allocate_large);
criterion_main!(benches);
