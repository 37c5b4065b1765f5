//! # Boundary Exporter
//!
//! Derives optimizer boundary definitions (`id1,id2,boundary`) from
//! planning-unit connectivity.
//!
//! - `Asymmetric`: every directed edge between distinct units.
//! - `Symmetric`: one row per unordered pair, weight `w(i,j) + w(j,i)`.

use crate::formats::Table;
use crate::graph::ConnectivityGraph;
use crate::{ConnectivitySource, ConplanError, Outcome, UnitId, Warning, WarningKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How connectivity turns into boundary rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// Unordered pairs with summed weights.
    #[default]
    Symmetric,
    /// Directed pairs; requires `ASYMMETRICCONNECTIVITY 1` in the optimizer input.
    Asymmetric,
}

impl FromStr for BoundaryMode {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" => Ok(Self::Symmetric),
            "asymmetric" => Ok(Self::Asymmetric),
            other => Err(ConplanError::Configuration(format!(
                "Unknown boundary mode '{}'. Use: symmetric, asymmetric",
                other
            ))),
        }
    }
}

/// One boundary definition row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRow {
    /// Lower planning-unit id of the pair in symmetric mode, the source
    /// unit otherwise.
    pub id1: UnitId,
    /// Other planning unit of the pair.
    pub id2: UnitId,
    /// Connection strength written as the boundary cost.
    pub boundary: f64,
}

/// Boundary rows of `graph` under `mode`. Self-loops and zero weights are
/// never emitted.
#[must_use]
pub fn connectivity_boundary(graph: &ConnectivityGraph, mode: BoundaryMode) -> Vec<BoundaryRow> {
    match mode {
        BoundaryMode::Asymmetric => graph
            .edges()
            .filter(|(from, to, w)| from != to && *w != 0.0)
            .map(|(id1, id2, boundary)| BoundaryRow { id1, id2, boundary })
            .collect(),
        BoundaryMode::Symmetric => {
            let mut pairs: BTreeMap<(UnitId, UnitId), f64> = BTreeMap::new();
            for (from, to, w) in graph.edges() {
                if from != to {
                    *pairs.entry((from.min(to), from.max(to))).or_insert(0.0) += w;
                }
            }
            pairs
                .into_iter()
                .filter(|(_, w)| *w != 0.0)
                .map(|((id1, id2), boundary)| BoundaryRow { id1, id2, boundary })
                .collect()
        }
    }
}

/// Boundary table with columns `id1,id2,boundary`.
#[must_use]
pub fn boundary_table(rows: &[BoundaryRow]) -> Table {
    let mut table = Table::new(["id1", "id2", "boundary"]);
    table.rows = rows
        .iter()
        .map(|r| vec![r.id1.to_string(), r.id2.to_string(), r.boundary.to_string()])
        .collect();
    table
}

/// A boundary file ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryExport {
    /// Source the rows came from.
    pub source: ConnectivitySource,
    /// Destination path.
    pub path: PathBuf,
    /// Rows in id order.
    pub rows: Vec<BoundaryRow>,
}

impl BoundaryExport {
    /// Write the rows as CSV.
    pub fn write(&self) -> Result<(), ConplanError> {
        boundary_table(&self.rows).write_path(&self.path)
    }
}

/// Plan one boundary file per planning-unit connectivity source.
///
/// With several sources each file name gets a `_<source>_pu` suffix and a
/// warning says so. Without planning-unit metrics the export is refused
/// with a warning and nothing is planned.
#[must_use]
pub fn plan_boundaries(
    sources: &[(ConnectivitySource, &ConnectivityGraph)],
    mode: BoundaryMode,
    path: &Path,
    has_planning_unit_metrics: bool,
) -> Outcome<Vec<BoundaryExport>> {
    if !has_planning_unit_metrics {
        return Outcome::with_warnings(
            Vec::new(),
            vec![Warning::new(
                WarningKind::Configuration,
                "No planning unit connectivity metrics exist; boundary definition not exported",
            )],
        );
    }

    let mut warnings = Vec::new();
    let suffixed = sources.len() > 1;
    if suffixed {
        warnings.push(Warning::new(
            WarningKind::Configuration,
            format!(
                "Several connectivity sources are active; boundary files are suffixed with the source type instead of '{}'",
                path.display()
            ),
        ));
    }

    let exports = sources
        .iter()
        .map(|(source, graph)| BoundaryExport {
            source: *source,
            path: if suffixed {
                suffixed_path(path, &format!("{}_pu", source.tag()))
            } else {
                path.to_path_buf()
            },
            rows: connectivity_boundary(graph, mode),
        })
        .collect();
    Outcome::with_warnings(exports, warnings)
}

/// `bound.dat` + `demo_pu` -> `bound_demo_pu.dat`.
#[must_use]
pub fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ConnectivityGraph {
        let mut g = ConnectivityGraph::new();
        g.insert_edge(UnitId(1), UnitId(2), 0.25);
        g.insert_edge(UnitId(2), UnitId(1), 0.5);
        g.insert_edge(UnitId(2), UnitId(2), 0.9);
        g.insert_edge(UnitId(3), UnitId(1), 0.1);
        g
    }

    #[test]
    fn asymmetric_rows_are_directed() {
        let rows = connectivity_boundary(&graph(), BoundaryMode::Asymmetric);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].id1, UnitId(2));
        assert_eq!(rows[1].boundary, 0.5);
    }

    #[test]
    fn symmetric_rows_sum_both_directions() {
        let rows = connectivity_boundary(&graph(), BoundaryMode::Symmetric);
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].id1, rows[0].id2, rows[0].boundary), (UnitId(1), UnitId(2), 0.75));
        assert_eq!((rows[1].id1, rows[1].id2), (UnitId(1), UnitId(3)));
    }

    #[test]
    fn multiple_sources_get_suffixes() {
        let g = graph();
        let plan = plan_boundaries(
            &[
                (ConnectivitySource::Demographic, &g),
                (ConnectivitySource::Landscape, &g),
            ],
            BoundaryMode::Symmetric,
            Path::new("input/bound.dat"),
            true,
        );
        assert_eq!(plan.warnings.len(), 1);
        assert_eq!(plan.value[0].path, PathBuf::from("input/bound_demo_pu.dat"));
        assert_eq!(plan.value[1].path, PathBuf::from("input/bound_land_pu.dat"));
    }

    #[test]
    fn export_refused_without_metrics() {
        let g = graph();
        let plan = plan_boundaries(
            &[(ConnectivitySource::Demographic, &g)],
            BoundaryMode::Symmetric,
            Path::new("bound.dat"),
            false,
        );
        assert!(plan.value.is_empty());
        assert_eq!(plan.warnings[0].kind, WarningKind::Configuration);
    }
}
