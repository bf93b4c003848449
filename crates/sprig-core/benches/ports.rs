use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sprig_core::{allocate, Sibling};
use sprig_schema::PortsSection;
use std::time::{Duration, SystemTime};

fn siblings(count: u64) -> Vec<Sibling> {
    (0..count)
        .map(|i| Sibling {
            name: format!("feature-{}", i * 7),
            created: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(i)),
        })
        .collect()
}

fn bench_allocate_new(c: &mut Criterion) {
    let live = siblings(40);
    c.bench_function("ports_allocate_new_40_siblings", |b| {
        b.iter(|| {
            allocate(
                black_box(&live),
                black_box("checkout-redesign"),
                PortsSection::default(),
                "shop",
            )
            .unwrap()
        });
    });
}

fn bench_allocate_existing(c: &mut Criterion) {
    let live = siblings(40);
    c.bench_function("ports_allocate_existing_40_siblings", |b| {
        b.iter(|| {
            allocate(
                black_box(&live),
                black_box("feature-140"),
                PortsSection::default(),
                "shop",
            )
            .unwrap()
        });
    });
}

fn bench_allocate_crowded(c: &mut Criterion) {
    let live = siblings(99);
    c.bench_function("ports_allocate_last_free_offset", |b| {
        b.iter(|| {
            allocate(
                black_box(&live),
                black_box("one-more"),
                PortsSection::default(),
                "shop",
            )
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_new,
    bench_allocate_existing,
    bench_allocate_crowded,
);
criterion_main!(benches);
