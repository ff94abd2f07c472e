//! Benchmarks for Canopy zone geometry
//!
//! Measures performance of:
//! - Element midpoints at growing precision
//! - Zone splitting
//! - Adjacency tests
//! - Constraint evaluation

use canopy_topology::{Bound, Constraint, Coordinate, Element, Space, Zone};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Split the full space `depth` times, cycling through dimensions.
fn deep_zone(depth: usize) -> Zone {
    let space = Space::default();
    let mut zone = space.zone();
    for i in 0..depth {
        let (low, _high) = zone.split(i % space.dimensions()).unwrap();
        zone = low;
    }
    zone
}

/// Benchmark midpoint computation as elements gain digits
fn bench_middle(c: &mut Criterion) {
    let mut group = c.benchmark_group("element_middle");

    for &depth in &[0usize, 4, 16, 64] {
        let zone = deep_zone(depth * 3);
        let (lo, hi) = (zone.lower()[0].clone(), zone.upper()[0].clone());
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &(lo, hi), |b, (lo, hi)| {
            b.iter(|| Element::middle(black_box(lo), black_box(hi)))
        });
    }
    group.finish();
}

/// Benchmark zone splitting
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("zone_split");

    for &depth in &[0usize, 12, 48, 192] {
        let zone = deep_zone(depth);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("depth", depth), &zone, |b, z| {
            b.iter(|| black_box(z).split(depth % 3))
        });
    }
    group.finish();
}

/// Benchmark adjacency between the two halves of a split
fn bench_neighbors(c: &mut Criterion) {
    let mut group = c.benchmark_group("zone_neighbors");

    for &depth in &[0usize, 12, 48, 192] {
        let (low, high) = deep_zone(depth).split(0).unwrap();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("depth", depth), &(low, high), |b, (l, h)| {
            b.iter(|| black_box(l).neighbors(black_box(h)))
        });
    }
    group.finish();
}

/// Benchmark constraint matching against zones
fn bench_constraint(c: &mut Criterion) {
    let zone = deep_zone(24);
    let point = Constraint::point(&Coordinate::from_strs(&["k", "p", "o"]));
    let subject = Constraint::any(3).with(0, Bound::Point(Element::new("k")));

    c.bench_function("constraint_point", |b| {
        b.iter(|| black_box(&point).matches_zone(black_box(&zone)))
    });
    c.bench_function("constraint_subject", |b| {
        b.iter(|| black_box(&subject).matches_zone(black_box(&zone)))
    });
    c.bench_function("constraint_target", |b| {
        b.iter(|| black_box(&subject).target_from(black_box(&zone)))
    });
}

criterion_group!(
    benches,
    bench_middle,
    bench_split,
    bench_neighbors,
    bench_constraint,
);

criterion_main!(benches);
