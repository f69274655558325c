//! Benchmarks for RangeCache operations.
//!
//! Run with: cargo bench -p range-cache --bench range_cache

use cache_core::{Evictor, LruEvictor};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use range_cache::RangeCache;
use std::sync::Arc;
use std::thread;

const UNIT: usize = 4096;

fn cache(max_size: u64) -> RangeCache<u64> {
    let evictor: Arc<dyn Evictor> = Arc::new(LruEvictor::new(max_size, 16).unwrap());
    RangeCache::new(evictor, (max_size as usize / UNIT).max(1), UNIT).unwrap()
}

/// Benchmark inserts of fresh ranges, with and without eviction pressure.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_cache/insert");

    for count in [1u32, 8, 64] {
        let value = vec![0u8; count as usize * UNIT];
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::new("units", count), &count, |b, &count| {
            let cache = cache(64 * 1024 * 1024);
            let mut base = 0u64;

            b.iter(|| {
                let _ = black_box(cache.insert(&base, 0, count, value.clone()));
                base = base.wrapping_add(1);
            });
        });
    }

    group.finish();
}

/// Benchmark overwrites that trim or split resident ranges.
fn bench_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_cache/overwrite");
    group.throughput(Throughput::Elements(1));

    group.bench_function("split", |b| {
        let cache = cache(256 * 1024 * 1024);
        for base in 0..1024u64 {
            cache.insert(&base, 0, 128, vec![0u8; 128 * UNIT]).unwrap();
        }
        let hole = vec![1u8; UNIT];
        let mut i = 0u64;

        b.iter(|| {
            let base = i % 1024;
            let offset = 1 + (i / 1024) % 126;
            let _ = black_box(cache.insert(&base, offset, 1, hole.clone()));
            i = i.wrapping_add(1);
        });
    });

    group.finish();
}

/// Benchmark lookups that hit, partly hit, and miss.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_cache/lookup");
    group.throughput(Throughput::Elements(1));

    let cache = cache(256 * 1024 * 1024);
    for base in 0..1024u64 {
        cache.insert(&base, 0, 32, vec![0u8; 32 * UNIT]).unwrap();
    }

    for (name, offset, count) in [("hit", 0u64, 32u32), ("partial", 16, 32), ("miss", 64, 32)] {
        group.bench_function(name, |b| {
            let mut base = 0u64;
            b.iter(|| {
                let _ = black_box(cache.lookup(&base, offset, count));
                base = (base + 1) % 1024;
            });
        });
    }

    group.finish();
}

/// Benchmark concurrent mixed traffic.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_cache/concurrent");

    for threads in [2, 4, 8] {
        let ops_per_thread = 10_000u64;
        group.throughput(Throughput::Elements(threads * ops_per_thread));
        group.bench_with_input(
            BenchmarkId::new("mixed_80_20", threads),
            &threads,
            |b, &threads| {
                let cache = cache(64 * 1024 * 1024);
                let block = vec![0u8; 4 * UNIT];

                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let cache = cache.clone();
                            let block = block.clone();
                            thread::spawn(move || {
                                for i in 0..ops_per_thread {
                                    let base = (t * ops_per_thread + i) % 4096;
                                    if i % 5 == 0 {
                                        let _ = cache.insert(&base, 0, 4, block.clone());
                                    } else {
                                        let _ = black_box(cache.get(&base, 0, 4));
                                    }
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_overwrite,
    bench_lookup,
    bench_concurrent
);
criterion_main!(benches);
