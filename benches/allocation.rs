use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flatfs::{Filesystem, MemStore, SpaceAllocator, DATA_OFFSET};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const REGION: usize = 1024 * 1024;

fn new_fs() -> Filesystem<MemStore> {
    Filesystem::format(MemStore::new(DATA_OFFSET as usize + REGION)).unwrap()
}

/// Benchmark carving fixed-size extents off the front of one free block
fn bench_allocate_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_sequential");

    for size in [64u32, 1024, 16 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut fs = new_fs();
                let mut allocator = fs.allocator();
                for _ in 0..(REGION as u32 / size).min(1000) {
                    black_box(allocator.allocate(size).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark allocation + free cycles (fragmentation test)
fn bench_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");

    for live in [16usize, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            b.iter(|| {
                let mut fs = new_fs();
                let mut rng = StdRng::seed_from_u64(42);
                let mut extents = Vec::with_capacity(live);

                for _ in 0..live {
                    let size = rng.gen_range(16..512);
                    let start = fs.allocator().allocate(size).unwrap();
                    extents.push((start, size));
                }

                // Free every other extent, then refill the holes
                for &(start, size) in extents.iter().step_by(2) {
                    fs.allocator().free(start, size).unwrap();
                }
                for _ in 0..live / 2 {
                    let size = rng.gen_range(16..512);
                    black_box(fs.allocator().allocate(size).ok());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark writes that force relocation
fn bench_relocating_writes(c: &mut Criterion) {
    c.bench_function("relocating_append", |b| {
        b.iter(|| {
            let mut fs = new_fs();
            let h = fs.open_file("log", true).unwrap();
            let chunk = [0x5Au8; 256];
            for i in 0..64u32 {
                fs.write(&h, i * 256, &chunk).unwrap();
            }
            black_box(fs.stats().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_sequential,
    bench_alloc_free_cycle,
    bench_relocating_writes
);
criterion_main!(benches);
