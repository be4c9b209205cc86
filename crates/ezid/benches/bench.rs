use core::hint::black_box;
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use ezid::{MemoryMinterStore, Minter, check_char, create_minter, mint};
use std::time::Instant;

// Number of IDs minted per benchmark iteration.
const TOTAL_IDS: usize = 4096;

/// Benchmarks the in-memory hot path: no state is loaded or saved.
fn bench_minter(c: &mut Criterion, group_name: &str, mask: &str) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                let mut minter = Minter::create("99999/fk4", mask).unwrap();
                for id in minter.mint(TOTAL_IDS) {
                    black_box(id.unwrap());
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn benchmark_mint_eedk(c: &mut Criterion) {
    bench_minter(c, "mint/eedk", "eedk");
}

// Exhausts the 100-id template 40 times per iteration.
fn benchmark_mint_extending(c: &mut Criterion) {
    bench_minter(c, "mint/dd-extending", "dd");
}

fn benchmark_mint_with_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("mint/memory-store");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_batched(
            || {
                let store = MemoryMinterStore::new();
                create_minter(&store, "99999/fk4", "eedk").unwrap();
                store
            },
            |store| black_box(mint(&store, "99999/fk4", TOTAL_IDS, false).unwrap()),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn benchmark_check_char(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_char");
    group.throughput(Throughput::Elements(1));
    group.bench_function("99999/fk4eedk", |b| {
        b.iter(|| check_char(black_box("99999/fk44w2")));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_mint_eedk,
    benchmark_mint_extending,
    benchmark_mint_with_store,
    benchmark_check_char,
);
criterion_main!(benches);
