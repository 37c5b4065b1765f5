//! # Scenario Tests
//!
//! End-to-end scenarios over the public engine API: rescaling onto a
//! planning grid, discretization, feature append, post-hoc evaluation and
//! matrix-type validation.

use conplan_core::posthoc::posthoc_table;
use conplan_core::{
    Bound, ConnectivityData, ConnectivityGraph, ConnectivitySource, FeatureConfig, FeatureTables,
    GeometryDocument, MatrixFormat, MatrixType, MetricKind, MetricOrigin, MetricRequest,
    MetricResult, MetricStore, NoProgress, Session, SessionConfig, SourceInput, Table, UnitId,
    UnitScope, UnitSet, WarningKind, assemble_features, discretize, evaluate, parse_connectivity,
};
use std::collections::BTreeSet;

// =============================================================================
// HELPERS
// =============================================================================

/// Unit squares laid out along the x axis, one per id.
fn strip(ids: &[u64]) -> UnitSet {
    let units: Vec<String> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let x = i as f64;
            format!(
                r#"{{"id": {id}, "polygons": [[[[{x},0],[{x1},0],[{x1},1],[{x},1],[{x},0]]]]}}"#,
                id = id,
                x = x,
                x1 = x + 1.0
            )
        })
        .collect();
    let json = format!(r#"{{"crs": "EPSG:6933", "units": [{}]}}"#, units.join(","));
    let doc = GeometryDocument::parse(&json).expect("geometry document");
    UnitSet::from_document(&doc).expect("unit set")
}

fn ids(v: &[u64]) -> BTreeSet<UnitId> {
    v.iter().map(|i| UnitId(*i)).collect()
}

fn pu_metric(name: &str, values: &[f64]) -> MetricResult {
    MetricResult {
        name: name.to_string(),
        origin: MetricOrigin::Imported,
        scope: UnitScope::PlanningUnit,
        values: values
            .iter()
            .enumerate()
            .map(|(i, v)| (UnitId(i as u64 + 1), *v))
            .collect(),
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn degrees_on_rescaled_grid_match_matrix_sums() {
    // connectivity units 10 and 11 sit exactly on planning units 1 and 2
    let matrix = ",10,11\n10,0.5,0.25\n11,0.125,2\n";
    let data = parse_connectivity(matrix, MatrixFormat::Matrix)
        .expect("parse")
        .value;

    let mut session = Session::new(strip(&[1, 2, 3]), SessionConfig::default());
    session
        .add_source(
            SourceInput {
                source: ConnectivitySource::Demographic,
                data,
                matrix_type: Some(MatrixType::Flow),
                units: Some(strip(&[10, 11])),
            },
            &NoProgress,
        )
        .expect("add source");
    session
        .recalculate(
            &[MetricRequest {
                source: ConnectivitySource::Demographic,
                scope: UnitScope::PlanningUnit,
                kinds: vec![MetricKind::InDegree, MetricKind::OutDegree],
            }],
            &NoProgress,
        )
        .expect("recalculate");

    let inn = session.metrics().get("in_degree_demo_pu").expect("in_degree");
    let out = session.metrics().get("out_degree_demo_pu").expect("out_degree");
    let value = |m: &MetricResult, id: u64| m.values.get(&UnitId(id)).copied().unwrap_or(0.0);

    assert!((value(inn, 1) - 0.625).abs() < 1e-9);
    assert!((value(inn, 2) - 2.25).abs() < 1e-9);
    assert!((value(out, 1) - 0.75).abs() < 1e-9);
    assert!((value(out, 2) - 2.125).abs() < 1e-9);
    assert_eq!(value(inn, 3), 0.0);
    assert_eq!(value(out, 3), 0.0);
}

#[test]
fn lower_quartile_to_maximum_flags_upper_values() {
    let metric = pu_metric("google_demo_pu", &[1.0, 2.0, 3.0, 4.0, 10.0]);
    let derived =
        discretize(&metric, Bound::LowerQuartile, Bound::Maximum, None).expect("discretize");
    assert_eq!(derived.name, "google_demo_pu_lower_quartile_to_maximum");
    let flags: Vec<f64> = derived.values.values().copied().collect();
    assert_eq!(flags, vec![0.0, 1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn appended_features_continue_after_existing_ids() {
    let spec = Table::parse(
        "id,target,spf,name\n1,5,1000,a\n2,5,1000,b\n3,5,1000,c\n4,5,1000,d\n5,5,1000,e\n",
    )
    .expect("spec");
    let amounts = Table::parse("species,pu,amount\n1,1,2\n5,2,3\n").expect("amounts");
    let existing = FeatureTables::from_tables(&spec, &amounts).expect("existing");
    assert_eq!(existing.max_id(), 5);

    let mut store = MetricStore::new();
    store.insert(pu_metric("in_degree_demo_pu", &[1.0, 0.0, 2.0]));
    store.insert(pu_metric("out_degree_demo_pu", &[0.0, 4.0, 0.0]));
    let new = assemble_features(&store, None, &FeatureConfig::default()).expect("features");

    let merged = existing.append(new);
    let new_ids: Vec<u64> = merged.specs.iter().skip(5).map(|s| s.id).collect();
    assert_eq!(new_ids, vec![6, 7]);
    assert!(merged.amounts.iter().any(|a| a.species == 7 && a.pu == UnitId(2)));
    assert!(
        merged
            .amounts
            .windows(2)
            .all(|w| (w[0].pu, w[0].species) <= (w[1].pu, w[1].species))
    );
}

#[test]
fn posthoc_counts_connections_between_selected_units() {
    let mut graph = ConnectivityGraph::with_nodes(ids(&[1, 2, 3, 4]));
    graph.insert_edge(UnitId(1), UnitId(2), 1.0);
    graph.insert_edge(UnitId(2), UnitId(3), 1.0);
    graph.insert_edge(UnitId(3), UnitId(4), 1.0);
    let data = ConnectivityData::Single(graph);

    let rows = evaluate(&data, &ids(&[1, 2, 3, 4]), &ids(&[1, 2, 3]));
    let connections = rows
        .iter()
        .find(|r| r.metric == "Connections" && r.kind == "All")
        .expect("connections row");
    assert_eq!(connections.total, 3.0);
    assert_eq!(connections.selected, 2.0);

    let table = posthoc_table(&rows);
    let percent_col = table.column("Percent").expect("percent");
    let row = table
        .rows
        .iter()
        .find(|r| r[0] == "Connections")
        .expect("connections");
    assert_eq!(row[percent_col], "66.7");
}

#[test]
fn migration_columns_are_checked() {
    let good = ",1,2\n1,0.25,0.5\n2,0.75,0.5\n";
    let parsed = parse_connectivity(good, MatrixFormat::Matrix).expect("parse");
    let graph = parsed.value.primary();
    for sum in graph.column_sums(true).values() {
        assert!((sum - 1.0).abs() < 1e-9);
    }
    assert!(conplan_core::formats::check_matrix_type(&graph, MatrixType::Migration).is_empty());

    let bad = ",1,2\n1,0.25,0.5\n2,0.5,0.5\n";
    let parsed = parse_connectivity(bad, MatrixFormat::Matrix).expect("parse");
    let warnings = conplan_core::formats::check_matrix_type(&parsed.value.primary(), MatrixType::Migration);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, WarningKind::MatrixType);
}
