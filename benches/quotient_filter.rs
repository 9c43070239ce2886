use aamf::ext_filter::ExtensionFilter;
use aamf::rsqf::RsqfFilter;
use aamf::sel_filter::SelectorFilter;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn bench_rsqf_insert(c: &mut Criterion) {
    let mut initial_items = 0;
    while initial_items < 1024 - 32 {
        c.bench_function(&format!("rsqf insert {}", initial_items), |b| {
            b.iter_batched_ref(
                || {
                    let mut filter = RsqfFilter::<u32>::new(1024);
                    for i in 0..initial_items {
                        filter.insert(&i);
                    }
                    filter
                },
                |filter| filter.insert(&0xDEADBEEFu32),
                BatchSize::PerIteration,
            )
        });
        initial_items += 32;
    }
}

fn bench_ext_filter_adapt(c: &mut Criterion) {
    c.bench_function("ext_filter repeated false positive query", |b| {
        b.iter_batched_ref(
            || {
                let mut filter = ExtensionFilter::<u32>::new(1024);
                for i in 0..512u32 {
                    filter.insert(&i);
                }
                filter
            },
            |filter| filter.contains(&0xDEADBEEFu32),
            BatchSize::PerIteration,
        )
    });
}

fn bench_sel_filter_adapt(c: &mut Criterion) {
    c.bench_function("sel_filter repeated false positive query", |b| {
        b.iter_batched_ref(
            || {
                let mut filter = SelectorFilter::<u32>::new(1024);
                for i in 0..512u32 {
                    filter.insert(&i);
                }
                filter
            },
            |filter| filter.contains(&0xDEADBEEFu32),
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(
    benches,
    bench_rsqf_insert,
    bench_ext_filter_adapt,
    bench_sel_filter_adapt
);
criterion_main!(benches);
