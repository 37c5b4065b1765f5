//! # Property-Based Tests
//!
//! Invariants of the engine checked with proptest: partition of unity of
//! rescaling mappings, format round trips, metric idempotence and
//! deterministic status merging.

use conplan_core::formats::{TemporalConnectivity, TypedConnectivity};
use conplan_core::metrics::MetricSet;
use conplan_core::status::AreaRule;
use conplan_core::{
    ConnectivityData, ConnectivityGraph, ConnectivitySource, EdgeRule, LockRule, MatrixFormat,
    MatrixType, MetricConfig, MetricContext, MetricKind, MetricOrigin, MetricResult, MetricStore,
    NoProgress, SpatialMatcher, SpatialUnit, UnitId, UnitScope, UnitSet, compute_metrics,
    merge_status, parse_connectivity, write_connectivity,
};
use geo::{MultiPolygon, polygon};
use proptest::collection::{btree_map, btree_set, vec};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// HELPERS
// =============================================================================

fn rect(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
    ]])
}

/// `k` by `k` planning units of side 2 covering `[0, 2k]^2`.
fn planning_grid(k: u64) -> UnitSet {
    let mut units = Vec::new();
    for i in 0..k {
        for j in 0..k {
            units.push(SpatialUnit::new(
                UnitId(i * k + j + 1),
                rect(i as f64 * 2.0, j as f64 * 2.0, 2.0),
            ));
        }
    }
    UnitSet {
        crs: "grid".to_string(),
        units,
    }
}

/// Unit squares shifted by `(dx, dy)`, all inside the planning grid.
fn fine_grid(k: u64, dx: f64, dy: f64) -> UnitSet {
    let n = 2 * k - 1;
    let mut units = Vec::new();
    for i in 0..n {
        for j in 0..n {
            units.push(SpatialUnit::new(
                UnitId(1000 + i * n + j),
                rect(i as f64 + dx, j as f64 + dy, 1.0),
            ));
        }
    }
    UnitSet {
        crs: "grid".to_string(),
        units,
    }
}

fn graph_from(edges: &BTreeMap<(u64, u64), f64>) -> ConnectivityGraph {
    let mut graph = ConnectivityGraph::new();
    for ((from, to), weight) in edges {
        graph.insert_edge(UnitId(*from), UnitId(*to), *weight);
    }
    graph
}

fn compute(graph: &ConnectivityGraph, kinds: &[MetricKind]) -> MetricSet {
    let data = ConnectivityData::Single(graph.clone());
    let units = graph.node_set().clone();
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
    compute_metrics(&ctx, kinds, &MetricConfig::default(), &NoProgress)
        .expect("metrics")
        .value
}

fn edge_strategy() -> impl Strategy<Value = BTreeMap<(u64, u64), f64>> {
    btree_map((1u64..12, 1u64..12), 0.01f64..100.0, 1..40)
}

/// One to four labelled, non-empty layers.
fn layer_strategy(labels: &'static [&'static str]) -> impl Strategy<Value = Vec<(String, ConnectivityGraph)>> {
    vec(btree_map((1u64..8, 1u64..8), 0.01f64..100.0, 1..15), 1..=labels.len()).prop_map(
        move |layers| {
            layers
                .iter()
                .zip(labels)
                .map(|(edges, label)| (label.to_string(), graph_from(edges)))
                .collect()
        },
    )
}

fn round_trip(data: &ConnectivityData, format: MatrixFormat) -> ConnectivityData {
    let mut buffer = Vec::new();
    write_connectivity(data, format, &mut buffer).expect("write");
    let text = String::from_utf8(buffer).expect("utf8");
    parse_connectivity(&text, format).expect("parse").value
}

fn same_edges(a: &ConnectivityGraph, b: &ConnectivityGraph) -> bool {
    a.edge_count() == b.edge_count()
        && a.edges().all(|(from, to, weight)| (b.weight(from, to) - weight).abs() < 1e-12)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Split mappings over a fully covered region sum to one per fine unit.
    #[test]
    fn split_mapping_is_partition_of_unity(
        k in 1u64..4,
        dx in 0.05f64..0.95,
        dy in 0.05f64..0.95,
        indexed in any::<bool>(),
    ) {
        let planning = planning_grid(k);
        let fine = fine_grid(k, dx, dy);
        let threshold = if indexed { 0 } else { usize::MAX };
        let outcome = SpatialMatcher::new(EdgeRule::Split)
            .with_index_threshold(threshold)
            .match_units(&fine, &planning, &NoProgress)
            .expect("match");

        prop_assert!(outcome.warnings.is_empty());
        for unit in &fine.units {
            prop_assert!((outcome.value.total(unit.id) - 1.0).abs() < 1e-6);
        }
    }

    /// Edge lists survive a write/parse cycle.
    #[test]
    fn edge_list_round_trip(edges in edge_strategy()) {
        let data = ConnectivityData::Single(graph_from(&edges));
        let mut buffer = Vec::new();
        write_connectivity(&data, MatrixFormat::EdgeList, &mut buffer).expect("write");
        let text = String::from_utf8(buffer).expect("utf8");
        let parsed = parse_connectivity(&text, MatrixFormat::EdgeList).expect("parse").value;

        let original = data.primary();
        let reparsed = parsed.primary();
        prop_assert_eq!(original.edge_count(), reparsed.edge_count());
        for (from, to, weight) in original.edges() {
            prop_assert!((reparsed.weight(from, to) - weight).abs() < 1e-12);
        }
    }

    /// Square matrices survive a write/parse cycle.
    #[test]
    fn matrix_round_trip(edges in edge_strategy()) {
        let data = ConnectivityData::Single(graph_from(&edges));
        let mut buffer = Vec::new();
        write_connectivity(&data, MatrixFormat::Matrix, &mut buffer).expect("write");
        let text = String::from_utf8(buffer).expect("utf8");
        let parsed = parse_connectivity(&text, MatrixFormat::Matrix).expect("parse").value;

        let original = data.primary();
        let reparsed = parsed.primary();
        prop_assert_eq!(original.node_set(), reparsed.node_set());
        for (from, to, weight) in original.edges() {
            prop_assert!((reparsed.weight(from, to) - weight).abs() < 1e-12);
        }
    }

    /// Typed edge lists keep their layer labels, order and weights.
    #[test]
    fn typed_edge_list_round_trip(layers in layer_strategy(&["larvae", "adults", "eggs", "juveniles"])) {
        let data = ConnectivityData::Typed(TypedConnectivity { layers });
        let ConnectivityData::Typed(parsed) = round_trip(&data, MatrixFormat::EdgeListWithType) else {
            return Err(TestCaseError::fail("typed data expected"));
        };
        let ConnectivityData::Typed(original) = &data else {
            return Err(TestCaseError::fail("typed data expected"));
        };
        prop_assert_eq!(original.layers.len(), parsed.layers.len());
        for ((name, layer), (parsed_name, parsed_layer)) in original.layers.iter().zip(&parsed.layers) {
            prop_assert_eq!(name, parsed_name);
            prop_assert!(same_edges(layer, parsed_layer));
        }
    }

    /// Timed edge lists keep their slices, and reserved `mean` rows survive
    /// as rows.
    #[test]
    fn timed_edge_list_round_trip(
        slices in layer_strategy(&["2001", "2002", "2003", "2004"]),
        mean_rows in any::<bool>(),
    ) {
        let mut original = TemporalConnectivity::from_slices(slices);
        original.mean_rows = mean_rows;
        let data = ConnectivityData::Temporal(original.clone());
        let ConnectivityData::Temporal(parsed) = round_trip(&data, MatrixFormat::EdgeListWithTime) else {
            return Err(TestCaseError::fail("temporal data expected"));
        };

        prop_assert_eq!(parsed.mean_rows, mean_rows);
        prop_assert_eq!(original.slices.len(), parsed.slices.len());
        for ((time, slice), (parsed_time, parsed_slice)) in original.slices.iter().zip(&parsed.slices) {
            prop_assert_eq!(time, parsed_time);
            prop_assert!(same_edges(slice, parsed_slice));
        }
        prop_assert!(same_edges(&original.mean, &parsed.mean));
    }

    /// Computing the same metrics twice from unchanged inputs is identical.
    #[test]
    fn metric_computation_is_idempotent(edges in edge_strategy()) {
        let graph = graph_from(&edges);
        let kinds = [
            MetricKind::InDegree,
            MetricKind::OutDegree,
            MetricKind::Betweenness,
            MetricKind::Eigenvector,
            MetricKind::PageRank,
            MetricKind::SelfRecruitment,
        ];
        let first = compute(&graph, &kinds);
        let second = compute(&graph, &kinds);
        prop_assert_eq!(first.results, second.results);
    }

    /// Status merging is deterministic and lock metrics override areas.
    #[test]
    fn status_merge_is_deterministic(
        avoid in btree_set(1u64..20, 0..10),
        focus in btree_set(1u64..20, 0..10),
        locked in btree_set(1u64..20, 0..10),
    ) {
        let units: BTreeSet<UnitId> = (1..20).map(UnitId).collect();
        let avoid: BTreeSet<UnitId> = avoid.into_iter().map(UnitId).collect();
        let focus: BTreeSet<UnitId> = focus.into_iter().map(UnitId).collect();
        let mut store = MetricStore::new();
        store.insert(MetricResult {
            name: "google_demo_pu_median_to_maximum_lockout".to_string(),
            origin: MetricOrigin::Discretized {
                base: "google_demo_pu".to_string(),
                lock: Some(LockRule::LockOut),
            },
            scope: UnitScope::PlanningUnit,
            values: units
                .iter()
                .map(|id| (*id, if locked.contains(&id.value()) { 1.0 } else { 0.0 }))
                .collect(),
        });

        let run = || {
            merge_status(
                &units,
                &BTreeMap::new(),
                Some(AreaRule { units: &avoid, rule: Some(LockRule::LockOut) }),
                Some(AreaRule { units: &focus, rule: Some(LockRule::LockIn) }),
                &store,
            )
        };
        let first = run();
        prop_assert_eq!(&first, &run());
        for id in &locked {
            prop_assert_eq!(first[&UnitId(*id)].code(), 3);
        }
        for id in focus.iter().filter(|id| !locked.contains(&id.value())) {
            prop_assert_eq!(first[id].code(), 2);
        }
    }
}

#[test]
fn random_column_stochastic_matrices_pass_migration_check() {
    let mut runner = proptest::test_runner::TestRunner::default();
    runner
        .run(&vec(vec(0.1f64..1.0, 4), 4), |columns| {
            let mut graph = ConnectivityGraph::new();
            for (j, column) in columns.iter().enumerate() {
                let total: f64 = column.iter().sum();
                for (i, raw) in column.iter().enumerate() {
                    graph.insert_edge(UnitId(i as u64 + 1), UnitId(j as u64 + 1), raw / total);
                }
            }
            let warnings = conplan_core::formats::check_matrix_type(&graph, MatrixType::Migration);
            prop_assert!(warnings.is_empty());
            Ok(())
        })
        .expect("migration property");
}
