//! # Post-hoc Evaluator
//!
//! Scores an optimizer solution by how much connectivity it keeps. A
//! connection is retained when both of its endpoints are selected;
//! self-loops count as retained when their unit is selected.

use crate::formats::{ConnectivityData, Table};
use crate::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostHocRow {
    /// `Planning Units`, `Connections` or `Connectivity`.
    pub metric: String,
    /// Connection type, `All` for the whole graph.
    pub kind: String,
    /// Count or weight over the whole graph.
    pub total: f64,
    /// Count or weight kept by the solution.
    pub selected: f64,
    /// `selected / total` in percent; 0 when `total` is 0.
    pub percent: f64,
}

impl PostHocRow {
    fn new(metric: &str, kind: &str, total: f64, selected: f64) -> Self {
        Self {
            metric: metric.to_string(),
            kind: kind.to_string(),
            total,
            selected,
            percent: if total > 0.0 { selected / total * 100.0 } else { 0.0 },
        }
    }
}

/// Units whose solution value is at least 1. For selection frequencies
/// this is every unit chosen by at least one replicate.
#[must_use]
pub fn selected_units(solution: &BTreeMap<UnitId, f64>) -> BTreeSet<UnitId> {
    solution
        .iter()
        .filter(|(_, v)| **v >= 1.0)
        .map(|(id, _)| *id)
        .collect()
}

/// Evaluate a selection against planning-unit connectivity.
///
/// Typed connectivity yields `Connections`/`Connectivity` rows per type
/// followed by `All`; other data yields the `All` rows only. Zero-weight
/// edges are ignored.
#[must_use]
pub fn evaluate(
    data: &ConnectivityData,
    units: &BTreeSet<UnitId>,
    selection: &BTreeSet<UnitId>,
) -> Vec<PostHocRow> {
    let mut rows = vec![PostHocRow::new(
        "Planning Units",
        "All",
        units.len() as f64,
        units.intersection(selection).count() as f64,
    )];

    let mut layers = data.type_layers();
    if matches!(data, ConnectivityData::Typed(_)) {
        layers.push(("All".to_string(), data.primary()));
    }

    let mut connectivity = Vec::with_capacity(layers.len());
    for (kind, graph) in &layers {
        let (mut count, mut kept, mut weight, mut kept_weight) = (0.0, 0.0, 0.0, 0.0);
        for (from, to, w) in graph.edges().filter(|(_, _, w)| *w != 0.0) {
            count += 1.0;
            weight += w;
            if selection.contains(&from) && selection.contains(&to) {
                kept += 1.0;
                kept_weight += w;
            }
        }
        rows.push(PostHocRow::new("Connections", kind, count, kept));
        connectivity.push(PostHocRow::new("Connectivity", kind, weight, kept_weight));
    }
    rows.extend(connectivity);

    tracing::info!(selected = selection.len(), rows = rows.len(), "post-hoc evaluation");
    rows
}

/// Table with columns `Metric,Type,Total,Selected,Percent`.
#[must_use]
pub fn posthoc_table(rows: &[PostHocRow]) -> Table {
    let mut table = Table::new(["Metric", "Type", "Total", "Selected", "Percent"]);
    table.rows = rows
        .iter()
        .map(|r| {
            vec![
                r.metric.clone(),
                r.kind.clone(),
                r.total.to_string(),
                r.selected.to_string(),
                format!("{:.1}", r.percent),
            ]
        })
        .collect();
    table
}
