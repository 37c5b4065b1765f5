//! # Connectivity Formats (Matrix Normalizer)
//!
//! Parses connectivity files in one of four declared shapes into the
//! canonical [`ConnectivityGraph`] representation and writes them back.
//!
//! | Format | Columns |
//! |--------|---------|
//! | Matrix | square; header and first column are unit ids |
//! | Edge List | `id1,id2,value` |
//! | Edge List with Type | `type,id1,id2,value` |
//! | Edge List with Time | `time,id1,id2,value` (`time = mean` reserved) |
//!
//! A schema mismatch is a `Format` error listing the expected and actual
//! columns. Nothing is partially returned.

use super::table::detect_delimiter;
use crate::graph::ConnectivityGraph;
use crate::primitives::MEAN_TIME_LABEL;
use crate::{ConplanError, MatrixType, Outcome, UnitId, Warning, WarningKind};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

// =============================================================================
// FORMAT DESCRIPTOR
// =============================================================================

/// The tabular shape of a connectivity file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixFormat {
    /// Square matrix with unit ids as header and index.
    Matrix,
    /// `id1,id2,value`
    EdgeList,
    /// `type,id1,id2,value`
    EdgeListWithType,
    /// `time,id1,id2,value`
    EdgeListWithTime,
}

impl MatrixFormat {
    /// Human readable name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matrix => "Matrix",
            Self::EdgeList => "Edge List",
            Self::EdgeListWithType => "Edge List with Type",
            Self::EdgeListWithTime => "Edge List with Time",
        }
    }

    /// Column names an edge-list file must carry (empty for `Matrix`).
    #[must_use]
    pub fn expected_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Matrix => &[],
            Self::EdgeList => &["id1", "id2", "value"],
            Self::EdgeListWithType => &["type", "id1", "id2", "value"],
            Self::EdgeListWithTime => &["time", "id1", "id2", "value"],
        }
    }
}

impl FromStr for MatrixFormat {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "matrix" => Ok(Self::Matrix),
            "edge list" => Ok(Self::EdgeList),
            "edge list with type" => Ok(Self::EdgeListWithType),
            "edge list with time" => Ok(Self::EdgeListWithTime),
            _ => Err(ConplanError::Configuration(format!(
                "Unknown matrix format '{}'. Use: matrix, edge_list, edge_list_with_type, edge_list_with_time",
                s
            ))),
        }
    }
}

// =============================================================================
// PARSED DATA
// =============================================================================

/// Connectivity split by a categorical `type` column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedConnectivity {
    /// One graph per type, in order of first appearance.
    pub layers: Vec<(String, ConnectivityGraph)>,
}

impl TypedConnectivity {
    /// Sum of all layers.
    #[must_use]
    pub fn combined(&self) -> ConnectivityGraph {
        let mut combined = ConnectivityGraph::new();
        for (_, layer) in &self.layers {
            for node in layer.nodes() {
                combined.insert_node(node);
            }
            for (from, to, weight) in layer.edges() {
                combined.add_weight(from, to, weight);
            }
        }
        combined
    }
}

/// Connectivity observed over several time slices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemporalConnectivity {
    /// One graph per time slice, in order of first appearance.
    pub slices: Vec<(String, ConnectivityGraph)>,
    /// Edge-wise mean across slices.
    pub mean: ConnectivityGraph,
    /// The mean came from reserved `mean` rows and is written back as rows.
    pub mean_rows: bool,
}

impl TemporalConnectivity {
    /// Build from slices, deriving the mean.
    #[must_use]
    pub fn from_slices(slices: Vec<(String, ConnectivityGraph)>) -> Self {
        let mean = ConnectivityGraph::mean_of(slices.iter().map(|(_, g)| g));
        Self {
            slices,
            mean,
            mean_rows: false,
        }
    }
}

/// Canonical result of parsing any connectivity format.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityData {
    /// A single graph (`Matrix`, `Edge List`).
    Single(ConnectivityGraph),
    /// Graphs per connection type.
    Typed(TypedConnectivity),
    /// Graphs per time slice plus their mean.
    Temporal(TemporalConnectivity),
}

impl ConnectivityData {
    /// The graph metrics are computed on: the graph itself, the sum of
    /// typed layers, or the mean of time slices.
    #[must_use]
    pub fn primary(&self) -> Cow<'_, ConnectivityGraph> {
        match self {
            Self::Single(g) => Cow::Borrowed(g),
            Self::Typed(t) => Cow::Owned(t.combined()),
            Self::Temporal(t) => Cow::Borrowed(&t.mean),
        }
    }

    /// Time slices, when the data is temporal.
    #[must_use]
    pub fn time_slices(&self) -> Option<&[(String, ConnectivityGraph)]> {
        match self {
            Self::Temporal(t) => Some(&t.slices),
            _ => None,
        }
    }

    /// Graphs per connection type; non-typed data is a single `All` layer.
    #[must_use]
    pub fn type_layers(&self) -> Vec<(String, Cow<'_, ConnectivityGraph>)> {
        match self {
            Self::Typed(t) => t
                .layers
                .iter()
                .map(|(name, g)| (name.clone(), Cow::Borrowed(g)))
                .collect(),
            other => vec![("All".to_string(), other.primary())],
        }
    }

    /// Union of all node sets.
    #[must_use]
    pub fn node_set(&self) -> BTreeSet<UnitId> {
        match self {
            Self::Single(g) => g.node_set().clone(),
            Self::Typed(t) => t
                .layers
                .iter()
                .flat_map(|(_, g)| g.nodes())
                .collect(),
            Self::Temporal(t) => t
                .slices
                .iter()
                .flat_map(|(_, g)| g.nodes())
                .chain(t.mean.nodes())
                .collect(),
        }
    }

    /// Apply a graph transformation to every graph held, preserving shape.
    pub fn try_map<E>(
        &self,
        mut f: impl FnMut(&ConnectivityGraph) -> Result<ConnectivityGraph, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Single(g) => Self::Single(f(g)?),
            Self::Typed(t) => {
                let mut layers = Vec::with_capacity(t.layers.len());
                for (name, g) in &t.layers {
                    layers.push((name.clone(), f(g)?));
                }
                Self::Typed(TypedConnectivity { layers })
            }
            Self::Temporal(t) => {
                let mut slices = Vec::with_capacity(t.slices.len());
                for (name, g) in &t.slices {
                    slices.push((name.clone(), f(g)?));
                }
                Self::Temporal(TemporalConnectivity {
                    slices,
                    mean: f(&t.mean)?,
                    mean_rows: t.mean_rows,
                })
            }
        })
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Read and parse a connectivity file.
pub fn read_connectivity(
    path: impl AsRef<Path>,
    format: MatrixFormat,
) -> Result<Outcome<ConnectivityData>, ConplanError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConplanError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), format = format.label(), "parsing connectivity");
    parse_connectivity(&text, format)
}

/// Parse connectivity text in the declared format.
pub fn parse_connectivity(
    text: &str,
    format: MatrixFormat,
) -> Result<Outcome<ConnectivityData>, ConplanError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(text))
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let data = match format {
        MatrixFormat::Matrix => ConnectivityData::Single(parse_matrix(&mut rdr)?),
        _ => parse_edge_list(&mut rdr, format)?,
    };

    let mut warnings = Vec::new();
    if data.primary().edge_count() == 0 {
        warnings.push(Warning::new(
            WarningKind::Format,
            format!("{} file contains no connections", format.label()),
        ));
    }
    Ok(Outcome::with_warnings(data, warnings))
}

fn parse_weight(cell: &str, line: usize) -> Result<f64, ConplanError> {
    cell.parse::<f64>().map_err(|_| {
        ConplanError::Format(format!("Line {}: '{}' is not a number", line, cell))
    })
}

fn parse_matrix(rdr: &mut csv::Reader<&[u8]>) -> Result<ConnectivityGraph, ConplanError> {
    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(ConplanError::Format(
            "The Matrix format expects a header row of unit ids after an index column".to_string(),
        ));
    }
    let columns: Vec<UnitId> = headers
        .iter()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()?;

    let mut graph = ConnectivityGraph::with_nodes(columns.iter().copied());
    let mut row_ids = BTreeSet::new();

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let line = i + 2;
        let mut cells = record.iter();
        let from: UnitId = cells.next().unwrap_or_default().parse()?;
        if !row_ids.insert(from) {
            return Err(ConplanError::Format(format!(
                "Line {}: unit {} appears twice as a row",
                line, from
            )));
        }
        for (to, cell) in columns.iter().zip(cells) {
            let weight = parse_weight(cell, line)?;
            if weight != 0.0 {
                graph.insert_edge(from, *to, weight);
            }
        }
    }

    let column_ids: BTreeSet<UnitId> = columns.iter().copied().collect();
    if column_ids.len() != columns.len() || row_ids != column_ids {
        return Err(ConplanError::Format(format!(
            "The Matrix format expects a square matrix with identical row and column ids \
             ({} columns, {} rows)",
            columns.len(),
            row_ids.len()
        )));
    }
    Ok(graph)
}

fn check_edge_list_headers(
    headers: &csv::StringRecord,
    format: MatrixFormat,
) -> Result<Vec<usize>, ConplanError> {
    let expected = format.expected_columns();
    let actual: Vec<&str> = headers.iter().collect();
    let positions: Vec<Option<usize>> = expected
        .iter()
        .map(|name| actual.iter().position(|h| h.eq_ignore_ascii_case(name)))
        .collect();

    let mut problems = Vec::new();
    if actual.len() != expected.len() {
        problems.push(format!(
            "expects exactly {} columns, not {}",
            expected.len(),
            actual.len()
        ));
    }
    let missing: Vec<&str> = expected
        .iter()
        .zip(&positions)
        .filter(|(_, pos)| pos.is_none())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        problems.push(format!("is missing column(s) '{}'", missing.join("', '")));
    }
    if !problems.is_empty() {
        return Err(ConplanError::Format(format!(
            "The {} format {} (expected: {}; found: {})",
            format.label(),
            problems.join(" and "),
            expected.join(","),
            actual.join(",")
        )));
    }
    Ok(positions.into_iter().flatten().collect())
}

fn parse_edge_list(
    rdr: &mut csv::Reader<&[u8]>,
    format: MatrixFormat,
) -> Result<ConnectivityData, ConplanError> {
    let headers = rdr.headers()?.clone();
    let positions = check_edge_list_headers(&headers, format)?;
    // Position of id1 within `positions` depends on whether a leading
    // categorical column exists.
    let offset = usize::from(format != MatrixFormat::EdgeList);

    let mut layers: Vec<(String, ConnectivityGraph)> = Vec::new();
    let mut mean_rows: Option<ConnectivityGraph> = None;

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let line = i + 2;
        let cell = |k: usize| record.get(positions[k]).unwrap_or_default();

        let label = if offset == 1 { cell(0).to_string() } else { String::new() };
        let from: UnitId = cell(offset).parse()?;
        let to: UnitId = cell(offset + 1).parse()?;
        let weight = parse_weight(cell(offset + 2), line)?;

        let graph = if format == MatrixFormat::EdgeListWithTime && label == MEAN_TIME_LABEL {
            mean_rows.get_or_insert_with(ConnectivityGraph::new)
        } else {
            let idx = match layers.iter().position(|(name, _)| *name == label) {
                Some(idx) => idx,
                None => {
                    layers.push((label.clone(), ConnectivityGraph::new()));
                    layers.len() - 1
                }
            };
            &mut layers[idx].1
        };

        if graph.contains_edge(from, to) {
            return Err(ConplanError::Format(format!(
                "Line {}: duplicate connection {} -> {}{}",
                line,
                from,
                to,
                if label.is_empty() { String::new() } else { format!(" ({})", label) }
            )));
        }
        graph.insert_edge(from, to, weight);
    }

    Ok(match format {
        MatrixFormat::EdgeListWithType => ConnectivityData::Typed(TypedConnectivity { layers }),
        MatrixFormat::EdgeListWithTime => match mean_rows {
            Some(mut mean) => {
                for (_, slice) in &layers {
                    for node in slice.nodes() {
                        mean.insert_node(node);
                    }
                }
                ConnectivityData::Temporal(TemporalConnectivity {
                    slices: layers,
                    mean,
                    mean_rows: true,
                })
            }
            None => ConnectivityData::Temporal(TemporalConnectivity::from_slices(layers)),
        },
        _ => ConnectivityData::Single(layers.pop().map(|(_, g)| g).unwrap_or_default()),
    })
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Check a graph against the invariant of its declared matrix type.
///
/// Real data may legitimately deviate, so problems are warnings only.
#[must_use]
pub fn check_matrix_type(graph: &ConnectivityGraph, matrix_type: MatrixType) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let negative = graph.edges().filter(|(_, _, w)| *w < 0.0).count();
    if negative > 0 {
        warnings.push(Warning::new(
            WarningKind::MatrixType,
            format!("{} connections have negative weights", negative),
        ));
    }

    let (offenders, axis) = match matrix_type {
        MatrixType::Migration => (graph.columns_not_summing_to_one(), "columns"),
        MatrixType::Probability => (graph.rows_not_summing_to_one(), "rows"),
        MatrixType::Flow => (Vec::new(), ""),
    };
    if !offenders.is_empty() {
        let sample: Vec<String> = offenders.iter().take(5).map(ToString::to_string).collect();
        warnings.push(Warning::new(
            WarningKind::MatrixType,
            format!(
                "{} {} of this {} matrix do not sum to 1 (e.g. units {}){}",
                offenders.len(),
                axis,
                matrix_type.label(),
                sample.join(", "),
                if matrix_type == MatrixType::Probability {
                    "; expected only when mortality is modelled"
                } else {
                    ""
                }
            ),
        ));
    }
    warnings
}

// =============================================================================
// WRITING
// =============================================================================

fn write_dense(graph: &ConnectivityGraph, writer: impl Write) -> Result<(), ConplanError> {
    let ids: Vec<UnitId> = graph.nodes().collect();
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec![String::new()];
    header.extend(ids.iter().map(ToString::to_string));
    wtr.write_record(&header)?;

    for from in &ids {
        let mut row = vec![from.to_string()];
        row.extend(ids.iter().map(|to| graph.weight(*from, *to).to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Serialize connectivity data in the given format.
///
/// `Matrix` and `Edge List` write the primary graph; the typed and temporal
/// formats require data of the matching shape.
pub fn write_connectivity(
    data: &ConnectivityData,
    format: MatrixFormat,
    writer: impl Write,
) -> Result<(), ConplanError> {
    if format == MatrixFormat::Matrix {
        return write_dense(&data.primary(), writer);
    }

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(format.expected_columns())?;

    match (format, data) {
        (MatrixFormat::EdgeList, _) => {
            for (from, to, weight) in data.primary().edges() {
                wtr.write_record([from.to_string(), to.to_string(), weight.to_string()])?;
            }
        }
        (MatrixFormat::EdgeListWithType, ConnectivityData::Typed(t)) => {
            for (name, layer) in &t.layers {
                for (from, to, weight) in layer.edges() {
                    wtr.write_record([name.clone(), from.to_string(), to.to_string(), weight.to_string()])?;
                }
            }
        }
        (MatrixFormat::EdgeListWithTime, ConnectivityData::Temporal(t)) => {
            for (time, slice) in &t.slices {
                for (from, to, weight) in slice.edges() {
                    wtr.write_record([time.clone(), from.to_string(), to.to_string(), weight.to_string()])?;
                }
            }
            if t.mean_rows {
                for (from, to, weight) in t.mean.edges() {
                    wtr.write_record([
                        MEAN_TIME_LABEL.to_string(),
                        from.to_string(),
                        to.to_string(),
                        weight.to_string(),
                    ])?;
                }
            }
        }
        _ => {
            return Err(ConplanError::Configuration(format!(
                "Connectivity data does not have the shape required by the {} format",
                format.label()
            )));
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write the across-time mean of temporal data as a square matrix.
pub fn write_mean_of_times(
    data: &TemporalConnectivity,
    writer: impl Write,
) -> Result<(), ConplanError> {
    write_dense(&data.mean, writer)
}

// =============================================================================
// TESTS
// =============================================================================
