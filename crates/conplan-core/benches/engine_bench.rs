//! # Engine Benchmarks
//!
//! Spatial matching, rescaling and metric computation on synthetic grids.
//!
//! Run with: `cargo bench -p conplan-core`

use conplan_core::{
    ConnectivityData, ConnectivityGraph, ConnectivitySource, EdgeRule, MatrixType, MetricConfig,
    MetricContext, MetricKind, NoProgress, SpatialMatcher, SpatialUnit, UnitId, UnitScope,
    UnitSet, compute_metrics, rescale_graph,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use geo::{MultiPolygon, polygon};
use std::hint::black_box;

fn square_grid(side: u64, size: f64, offset: f64, first_id: u64) -> UnitSet {
    let mut units = Vec::new();
    for i in 0..side {
        for j in 0..side {
            let (x, y) = (i as f64 * size + offset, j as f64 * size + offset);
            units.push(SpatialUnit::new(
                UnitId(first_id + i * side + j),
                MultiPolygon::new(vec![polygon![
                    (x: x, y: y),
                    (x: x + size, y: y),
                    (x: x + size, y: y + size),
                    (x: x, y: y + size),
                ]]),
            ));
        }
    }
    UnitSet {
        crs: "bench".to_string(),
        units,
    }
}

/// Ring lattice: every unit connects to its next `k` neighbours.
fn ring_graph(n: u64, k: u64) -> ConnectivityGraph {
    let mut graph = ConnectivityGraph::new();
    for i in 0..n {
        for step in 1..=k {
            graph.insert_edge(UnitId(i + 1), UnitId((i + step) % n + 1), 1.0 / step as f64);
        }
    }
    graph
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_spatial_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_match");

    for side in [5u64, 10, 20].iter() {
        let planning = square_grid(*side, 2.0, 0.0, 1);
        let fine = square_grid(side * 2 - 1, 1.0, 0.5, 10_000);
        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, _| {
            b.iter(|| {
                black_box(
                    SpatialMatcher::new(EdgeRule::Split)
                        .match_units(&fine, &planning, &NoProgress)
                        .expect("match"),
                )
            });
        });
    }

    group.finish();
}

fn bench_rescale(c: &mut Criterion) {
    let mut group = c.benchmark_group("rescale");

    for side in [5u64, 10].iter() {
        let planning = square_grid(*side, 2.0, 0.0, 1);
        let fine = square_grid(side * 2 - 1, 1.0, 0.5, 1);
        let mapping = SpatialMatcher::new(EdgeRule::Split)
            .match_units(&fine, &planning, &NoProgress)
            .expect("match")
            .value;
        let n = fine.units.len() as u64;
        let graph = ring_graph(n, 4);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, graph| {
            b.iter(|| black_box(rescale_graph(graph, &mapping, &NoProgress)));
        });
    }

    group.finish();
}

fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    group.sample_size(20);

    for n in [50u64, 200].iter() {
        let data = ConnectivityData::Single(ring_graph(*n, 5));
        let units = data.node_set();
        let ctx = MetricContext {
            source: ConnectivitySource::Demographic,
            scope: UnitScope::PlanningUnit,
            data: &data,
            matrix_type: Some(MatrixType::Flow),
            least_path: false,
            units: &units,
            focus_units: None,
            avoidance_units: None,
        };
        for kind in [MetricKind::Betweenness, MetricKind::Eigenvector, MetricKind::PageRank] {
            group.bench_with_input(BenchmarkId::new(kind.name(), n), &ctx, |b, ctx| {
                b.iter(|| {
                    black_box(
                        compute_metrics(ctx, &[kind], &MetricConfig::default(), &NoProgress)
                            .expect("metrics"),
                    )
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_spatial_match, bench_rescale, bench_metrics);
criterion_main!(benches);
