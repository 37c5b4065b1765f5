//! # Metric Engine
//!
//! Computes per-unit connectivity metrics over a [`ConnectivityGraph`].
//!
//! ## Eligibility
//!
//! Which metrics can be computed depends on the connectivity source, the
//! declared matrix type and which auxiliary inputs (focus area, avoidance
//! area, least-path data, time slices) exist. The rules live in two static
//! tables, [`DEMOGRAPHIC_RULES`] and [`LANDSCAPE_RULES`], evaluated against
//! an [`Availability`] snapshot. Requested metrics that are not eligible
//! are skipped, never errors.
//!
//! ## Conventions
//!
//! | Metric | Definition |
//! |--------|------------|
//! | `in_degree` / `out_degree` | column / row sum, self-loops included |
//! | `between_cent` | Brandes betweenness, path length `1 / weight`, unnormalized |
//! | `eig_vect_cent` | power iteration on `(A + I)ᵀ`, scaled so the maximum is 1 |
//! | `google` | PageRank, dangling mass spread uniformly, sums to 1 |
//! | `self_recruit` | diagonal weight |
//! | `local_retention` | diagonal / row sum (self-loop included) |
//! | `outflow` / `inflow` | row / column sum, self-loops per [`FlowMode`] |
//! | `stochasticity` | mean coefficient of variation over time of incident edges |
//! | `temp_conn_cov` | mean pairwise covariance over time of incident edges |
//! | `fa_*` / `aa_*` | weight received from / sent to flagged units |

use crate::formats::ConnectivityData;
use crate::graph::ConnectivityGraph;
use crate::formats::Table;
use crate::primitives::{
    CONVERGENCE_TOLERANCE, DEFAULT_DAMPING, LOCKIN_SUFFIX, LOCKOUT_SUFFIX, MAX_POWER_ITERATIONS,
};
use crate::progress::Progress;
use crate::{
    ConnectivitySource, ConplanError, MatrixType, Outcome, UnitId, UnitScope, Warning, WarningKind,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::str::FromStr;

// =============================================================================
// METRIC KINDS
// =============================================================================

/// Every metric the engine knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    InDegree,
    OutDegree,
    Betweenness,
    Eigenvector,
    PageRank,
    SelfRecruitment,
    LocalRetention,
    Outflow,
    Inflow,
    Stochasticity,
    TemporalCovariance,
    FaRecipients,
    FaDonors,
    AaRecipients,
    AaDonors,
}

impl MetricKind {
    /// All kinds in canonical output order.
    pub const ALL: [Self; 15] = [
        Self::InDegree,
        Self::OutDegree,
        Self::Betweenness,
        Self::Eigenvector,
        Self::PageRank,
        Self::SelfRecruitment,
        Self::LocalRetention,
        Self::Outflow,
        Self::Inflow,
        Self::Stochasticity,
        Self::TemporalCovariance,
        Self::FaRecipients,
        Self::FaDonors,
        Self::AaRecipients,
        Self::AaDonors,
    ];

    /// Short name used as the first component of metric names.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InDegree => "in_degree",
            Self::OutDegree => "out_degree",
            Self::Betweenness => "between_cent",
            Self::Eigenvector => "eig_vect_cent",
            Self::PageRank => "google",
            Self::SelfRecruitment => "self_recruit",
            Self::LocalRetention => "local_retention",
            Self::Outflow => "outflow",
            Self::Inflow => "inflow",
            Self::Stochasticity => "stochasticity",
            Self::TemporalCovariance => "temp_conn_cov",
            Self::FaRecipients => "fa_recipients",
            Self::FaDonors => "fa_donors",
            Self::AaRecipients => "aa_recipients",
            Self::AaDonors => "aa_donors",
        }
    }

    /// Full metric name for a source and scope, e.g. `in_degree_demo_pu`.
    #[must_use]
    pub fn qualified_name(&self, source: ConnectivitySource, scope: UnitScope) -> String {
        format!("{}_{}_{}", self.name(), source.tag(), scope.tag())
    }

    /// Whether this metric may be computed under `availability`.
    #[must_use]
    pub fn is_eligible(&self, availability: &Availability) -> bool {
        let rules = match availability.source {
            ConnectivitySource::Demographic => DEMOGRAPHIC_RULES,
            ConnectivitySource::Landscape => LANDSCAPE_RULES,
        };
        rules
            .iter()
            .any(|(kind, rule)| kind == self && rule(availability))
    }
}

impl FromStr for MetricKind {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(MetricKind::name).collect();
                ConplanError::Configuration(format!(
                    "Unknown metric '{}'. Use one of: {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}

// =============================================================================
// ELIGIBILITY
// =============================================================================

/// Snapshot of the inputs that decide metric eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    /// Source the connectivity came from.
    pub source: ConnectivitySource,
    /// Declared matrix type (demographic data only).
    pub matrix_type: Option<MatrixType>,
    /// A focus-area layer was supplied.
    pub has_focus_area: bool,
    /// An avoidance-area layer was supplied.
    pub has_avoidance_area: bool,
    /// Least-path connectivity data was supplied.
    pub least_path: bool,
    /// The connectivity has a time dimension.
    pub temporal: bool,
}

impl Availability {
    fn is(&self, t: MatrixType) -> bool {
        self.matrix_type == Some(t)
    }

    /// Every eligible kind in canonical order.
    #[must_use]
    pub fn eligible(&self) -> Vec<MetricKind> {
        MetricKind::ALL
            .into_iter()
            .filter(|k| k.is_eligible(self))
            .collect()
    }
}

type Rule = fn(&Availability) -> bool;

/// Eligibility of metrics over demographic connectivity.
///
/// `outflow`/`inflow` keep the historical grouping `Flow || (least-path && Probability)`.
pub const DEMOGRAPHIC_RULES: &[(MetricKind, Rule)] = &[
    (MetricKind::InDegree, |_| true),
    (MetricKind::OutDegree, |_| true),
    (MetricKind::Betweenness, |_| true),
    (MetricKind::PageRank, |_| true),
    (MetricKind::Eigenvector, |a| {
        a.is(MatrixType::Migration) || a.is(MatrixType::Flow) || a.least_path
    }),
    (MetricKind::SelfRecruitment, |a| {
        a.is(MatrixType::Migration) || a.is(MatrixType::Flow) || a.least_path
    }),
    (MetricKind::LocalRetention, |a| {
        a.is(MatrixType::Probability) || a.is(MatrixType::Flow)
    }),
    (MetricKind::Outflow, |a| {
        a.is(MatrixType::Flow) || (a.least_path && a.is(MatrixType::Probability))
    }),
    (MetricKind::Inflow, |a| {
        a.is(MatrixType::Flow) || (a.least_path && a.is(MatrixType::Probability))
    }),
    (MetricKind::Stochasticity, |a| a.has_focus_area && a.temporal),
    (MetricKind::TemporalCovariance, |a| a.temporal),
    (MetricKind::FaRecipients, |a| {
        a.has_focus_area
            && (a.is(MatrixType::Flow) || a.is(MatrixType::Migration) || a.least_path)
    }),
    (MetricKind::FaDonors, |a| {
        a.has_focus_area
            && (a.is(MatrixType::Flow) || (a.least_path && !a.is(MatrixType::Migration)))
    }),
    (MetricKind::AaRecipients, |a| {
        a.has_avoidance_area
            && (a.is(MatrixType::Flow) || a.is(MatrixType::Migration) || a.least_path)
    }),
    (MetricKind::AaDonors, |a| {
        a.has_avoidance_area
            && (a.is(MatrixType::Flow) || (a.least_path && !a.is(MatrixType::Migration)))
    }),
];

/// Eligibility of metrics over landscape connectivity.
pub const LANDSCAPE_RULES: &[(MetricKind, Rule)] = &[
    (MetricKind::InDegree, |_| true),
    (MetricKind::OutDegree, |_| true),
    (MetricKind::Betweenness, |_| true),
    (MetricKind::Eigenvector, |_| true),
    (MetricKind::PageRank, |_| true),
    (MetricKind::FaRecipients, |a| a.has_focus_area),
    (MetricKind::FaDonors, |a| a.has_focus_area),
    (MetricKind::AaRecipients, |a| a.has_avoidance_area),
    (MetricKind::AaDonors, |a| a.has_avoidance_area),
];

// =============================================================================
// CONFIGURATION AND INPUTS
// =============================================================================

/// Whether `outflow`/`inflow` count self-loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// Only flow between distinct units.
    #[default]
    ExcludeSelf,
    /// Self-recruitment counts as flow.
    IncludeSelf,
}

/// Numeric options of the metric engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// PageRank damping factor, in `(0, 1)`.
    pub damping: f64,
    /// Self-loop handling for outflow/inflow.
    pub flow_mode: FlowMode,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            damping: DEFAULT_DAMPING,
            flow_mode: FlowMode::default(),
        }
    }
}

impl MetricConfig {
    /// Reject out-of-range options before any computation starts.
    pub fn validate(&self) -> Result<(), ConplanError> {
        if !(self.damping > 0.0 && self.damping < 1.0) {
            return Err(ConplanError::Configuration(format!(
                "PageRank damping must lie strictly between 0 and 1, got {}",
                self.damping
            )));
        }
        Ok(())
    }
}

/// Everything one metric run reads.
#[derive(Debug, Clone, Copy)]
pub struct MetricContext<'a> {
    /// Source of the connectivity.
    pub source: ConnectivitySource,
    /// Units the connectivity is expressed over.
    pub scope: UnitScope,
    /// Parsed (and possibly rescaled) connectivity.
    pub data: &'a ConnectivityData,
    /// Declared matrix type, for demographic data.
    pub matrix_type: Option<MatrixType>,
    /// Least-path data is available.
    pub least_path: bool,
    /// Every unit of the scope; metrics report a value for each one.
    pub units: &'a BTreeSet<UnitId>,
    /// Units inside a focus area, when a focus-area layer exists.
    pub focus_units: Option<&'a BTreeSet<UnitId>>,
    /// Units inside an avoidance area, when an avoidance layer exists.
    pub avoidance_units: Option<&'a BTreeSet<UnitId>>,
}

impl MetricContext<'_> {
    /// Eligibility snapshot of this context.
    #[must_use]
    pub fn availability(&self) -> Availability {
        Availability {
            source: self.source,
            matrix_type: self.matrix_type,
            has_focus_area: self.focus_units.is_some(),
            has_avoidance_area: self.avoidance_units.is_some(),
            least_path: self.least_path,
            temporal: self.data.time_slices().is_some(),
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Status-override meaning of a discretized metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRule {
    /// Flagged units are forced into the solution.
    LockIn,
    /// Flagged units are excluded from the solution.
    LockOut,
}

impl FromStr for LockRule {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "lockin" => Ok(Self::LockIn),
            "lockout" => Ok(Self::LockOut),
            _ => Err(ConplanError::Configuration(format!(
                "Unknown lock rule '{}'. Use: lock_in, lock_out",
                s
            ))),
        }
    }
}

/// How a metric came to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricOrigin {
    /// Computed by the engine.
    Computed {
        /// Metric computed.
        kind: MetricKind,
        /// Connectivity it was computed from.
        source: ConnectivitySource,
    },
    /// Binary feature derived from another metric by thresholding.
    Discretized {
        /// Name of the metric it was derived from.
        base: String,
        /// Status rule it encodes, if any.
        lock: Option<LockRule>,
    },
    /// Loaded from a metrics table.
    Imported,
}

/// A named per-unit value mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Unique metric name.
    pub name: String,
    /// Provenance.
    pub origin: MetricOrigin,
    /// Units the values refer to.
    pub scope: UnitScope,
    /// Value per unit.
    pub values: BTreeMap<UnitId, f64>,
}

impl MetricResult {
    /// Lock rule of a discretized metric, if any.
    #[must_use]
    pub fn lock_rule(&self) -> Option<LockRule> {
        match &self.origin {
            MetricOrigin::Discretized { lock, .. } => *lock,
            _ => None,
        }
    }

    /// Sum of all values.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.values.values().sum()
    }
}

/// Ordered, name-unique collection of metric results.
///
/// Insertion order is the creation order, which is significant for status
/// lock rules and feature ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStore {
    metrics: Vec<MetricResult>,
}

impl MetricStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a metric. A metric with the same name is replaced in place,
    /// keeping its position.
    pub fn insert(&mut self, metric: MetricResult) {
        match self.metrics.iter_mut().find(|m| m.name == metric.name) {
            Some(slot) => *slot = metric,
            None => self.metrics.push(metric),
        }
    }

    /// Look up a metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricResult> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Remove a metric by name.
    pub fn remove(&mut self, name: &str) -> Option<MetricResult> {
        let pos = self.metrics.iter().position(|m| m.name == name)?;
        Some(self.metrics.remove(pos))
    }

    /// Metrics in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricResult> {
        self.metrics.iter()
    }

    /// Metrics of one scope in creation order.
    pub fn in_scope(&self, scope: UnitScope) -> impl Iterator<Item = &MetricResult> {
        self.metrics.iter().filter(move |m| m.scope == scope)
    }

    /// Number of metrics held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True when no metric is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Replace every computed metric of `source` and `scope` with `results`.
    ///
    /// Metrics that were computed before but are absent from `results` are
    /// removed; discretized and imported metrics stay.
    pub fn replace_computed(
        &mut self,
        source: ConnectivitySource,
        scope: UnitScope,
        results: Vec<MetricResult>,
    ) {
        self.metrics.retain(|m| {
            !(m.scope == scope
                && matches!(m.origin, MetricOrigin::Computed { source: s, .. } if s == source))
        });
        for metric in results {
            self.insert(metric);
        }
    }

    /// Wide table `id,<metric>...` of one scope. Units missing from a metric
    /// read as 0.
    #[must_use]
    pub fn to_table(&self, scope: UnitScope) -> Table {
        let metrics: Vec<&MetricResult> = self.in_scope(scope).collect();
        let ids: BTreeSet<UnitId> = metrics
            .iter()
            .flat_map(|m| m.values.keys().copied())
            .collect();
        let mut table = Table::new(
            std::iter::once("id".to_string()).chain(metrics.iter().map(|m| m.name.clone())),
        );
        table.rows = ids
            .into_iter()
            .map(|id| {
                std::iter::once(id.to_string())
                    .chain(
                        metrics
                            .iter()
                            .map(|m| m.values.get(&id).copied().unwrap_or(0.0).to_string()),
                    )
                    .collect()
            })
            .collect();
        table
    }

    /// Load a wide metrics table. Columns ending in the lock suffixes become
    /// lock-rule metrics; every other column is imported as is.
    pub fn from_table(table: &Table, scope: UnitScope) -> Result<Self, ConplanError> {
        let id_col = table.require_column("id")?;
        let ids = table.unit_ids(id_col)?;
        let mut store = Self::new();
        for (col, name) in table.headers.iter().enumerate() {
            if col == id_col {
                continue;
            }
            let values = table.numbers(col)?;
            store.insert(MetricResult {
                name: name.clone(),
                origin: origin_from_name(name),
                scope,
                values: ids.iter().copied().zip(values).collect(),
            });
        }
        Ok(store)
    }
}

fn origin_from_name(name: &str) -> MetricOrigin {
    let locks = [
        (LOCKIN_SUFFIX, LockRule::LockIn),
        (LOCKOUT_SUFFIX, LockRule::LockOut),
    ];
    locks
        .into_iter()
        .find_map(|(suffix, lock)| {
            name.strip_suffix(suffix).map(|rest| MetricOrigin::Discretized {
                base: rest.to_string(),
                lock: Some(lock),
            })
        })
        .unwrap_or(MetricOrigin::Imported)
}

/// Output of one engine run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    /// Computed metrics in canonical order.
    pub results: Vec<MetricResult>,
    /// Requested metrics that were not eligible.
    pub skipped: Vec<MetricKind>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Compute every requested, eligible metric.
///
/// Ineligible kinds are listed in [`MetricSet::skipped`]. The inputs are
/// not modified; the caller decides how to merge the results into a store.
pub fn compute_metrics(
    ctx: &MetricContext<'_>,
    requested: &[MetricKind],
    config: &MetricConfig,
    progress: &dyn Progress,
) -> Result<Outcome<MetricSet>, ConplanError> {
    config.validate()?;
    let availability = ctx.availability();
    let graph = ctx.data.primary();

    let mut wanted: Vec<MetricKind> = requested.to_vec();
    wanted.sort();
    wanted.dedup();

    let mut set = MetricSet::default();
    let mut warnings = Vec::new();
    let total = wanted.len();

    for (n, kind) in wanted.into_iter().enumerate() {
        if !kind.is_eligible(&availability) {
            tracing::debug!(metric = kind.name(), "metric not eligible, skipped");
            set.skipped.push(kind);
            continue;
        }
        let values = compute_metric(kind, ctx, &graph, config)?.collect_into(&mut warnings);
        set.results.push(MetricResult {
            name: kind.qualified_name(ctx.source, ctx.scope),
            origin: MetricOrigin::Computed {
                kind,
                source: ctx.source,
            },
            scope: ctx.scope,
            values,
        });
        progress.report("metrics", n + 1, total);
    }

    tracing::info!(
        source = ctx.source.tag(),
        scope = ctx.scope.tag(),
        computed = set.results.len(),
        skipped = set.skipped.len(),
        "metrics computed"
    );
    Ok(Outcome::with_warnings(set, warnings))
}

/// Compute a single metric over `graph`, ignoring eligibility.
pub fn compute_metric(
    kind: MetricKind,
    ctx: &MetricContext<'_>,
    graph: &ConnectivityGraph,
    config: &MetricConfig,
) -> Result<Outcome<BTreeMap<UnitId, f64>>, ConplanError> {
    let dense = DenseGraph::new(graph, ctx.units);
    let include_self = config.flow_mode == FlowMode::IncludeSelf;
    let mut warnings = Vec::new();

    let values = match kind {
        MetricKind::InDegree => dense.spread(graph.column_sums(true)),
        MetricKind::OutDegree => dense.spread(graph.row_sums(true)),
        MetricKind::Outflow => dense.spread(graph.row_sums(include_self)),
        MetricKind::Inflow => dense.spread(graph.column_sums(include_self)),
        MetricKind::SelfRecruitment => dense.map(|id| graph.weight(id, id)),
        MetricKind::LocalRetention => {
            let rows = graph.row_sums(true);
            dense.map(|id| match rows.get(&id) {
                Some(sum) if *sum > 0.0 => graph.weight(id, id) / sum,
                _ => 0.0,
            })
        }
        MetricKind::Betweenness => dense.label(betweenness(&dense)),
        MetricKind::Eigenvector => {
            let (scores, converged) = eigenvector(&dense);
            if !converged {
                warnings.push(not_converged(kind));
            }
            dense.label(scores)
        }
        MetricKind::PageRank => {
            let (scores, converged) = pagerank(&dense, config.damping);
            if !converged {
                warnings.push(not_converged(kind));
            }
            dense.label(scores)
        }
        MetricKind::FaRecipients => area_flow(&dense, graph, ctx.focus_units, Direction::From),
        MetricKind::FaDonors => area_flow(&dense, graph, ctx.focus_units, Direction::To),
        MetricKind::AaRecipients => area_flow(&dense, graph, ctx.avoidance_units, Direction::From),
        MetricKind::AaDonors => area_flow(&dense, graph, ctx.avoidance_units, Direction::To),
        MetricKind::Stochasticity | MetricKind::TemporalCovariance => {
            let slices = ctx.data.time_slices().ok_or_else(|| {
                ConplanError::Configuration(format!(
                    "{} requires connectivity with a time dimension",
                    kind.name()
                ))
            })?;
            let series = TimeSeries::new(slices);
            if kind == MetricKind::Stochasticity {
                dense.map(|id| series.mean_variation(id))
            } else {
                dense.map(|id| series.mean_covariance(id))
            }
        }
    };
    Ok(Outcome::with_warnings(values, warnings))
}

fn not_converged(kind: MetricKind) -> Warning {
    Warning::new(
        WarningKind::Configuration,
        format!(
            "{} did not converge within {} iterations; last iterate reported",
            kind.name(),
            MAX_POWER_ITERATIONS
        ),
    )
}

// =============================================================================
// DENSE VIEW
// =============================================================================

/// Index-addressed view over the union of graph nodes and scope units.
struct DenseGraph {
    ids: Vec<UnitId>,
    /// Outgoing `(target, weight)` per node, self-loops included.
    out: Vec<Vec<(usize, f64)>>,
}

impl DenseGraph {
    fn new(graph: &ConnectivityGraph, units: &BTreeSet<UnitId>) -> Self {
        let ids: Vec<UnitId> = graph
            .node_set()
            .union(units)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<UnitId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut out = vec![Vec::new(); ids.len()];
        for (from, to, weight) in graph.edges() {
            if let (Some(&i), Some(&j)) = (index.get(&from), index.get(&to)) {
                out[i].push((j, weight));
            }
        }
        Self { ids, out }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn map(&self, f: impl Fn(UnitId) -> f64) -> BTreeMap<UnitId, f64> {
        self.ids.iter().map(|id| (*id, f(*id))).collect()
    }

    fn label(&self, scores: Vec<f64>) -> BTreeMap<UnitId, f64> {
        self.ids.iter().copied().zip(scores).collect()
    }

    fn spread(&self, sums: BTreeMap<UnitId, f64>) -> BTreeMap<UnitId, f64> {
        self.map(|id| sums.get(&id).copied().unwrap_or(0.0))
    }
}

// =============================================================================
// CENTRALITY
// =============================================================================

#[derive(PartialEq)]
struct Visit {
    dist: f64,
    node: usize,
}

impl Eq for Visit {}

impl Ord for Visit {
    // min-heap on distance, then node index
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Brandes betweenness on a weighted digraph with path length `1 / weight`.
fn betweenness(g: &DenseGraph) -> Vec<f64> {
    let n = g.len();
    let lengths: Vec<Vec<(usize, f64)>> = g
        .out
        .iter()
        .enumerate()
        .map(|(v, edges)| {
            edges
                .iter()
                .filter(|(w, weight)| *w != v && *weight > 0.0)
                .map(|(w, weight)| (*w, 1.0 / weight))
                .collect()
        })
        .collect();

    let mut centrality = vec![0.0; n];
    for s in 0..n {
        let mut dist = vec![f64::INFINITY; n];
        let mut sigma = vec![0.0_f64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut settled = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut heap = BinaryHeap::new();

        dist[s] = 0.0;
        sigma[s] = 1.0;
        heap.push(Visit { dist: 0.0, node: s });

        while let Some(Visit { dist: d, node: v }) = heap.pop() {
            if settled[v] || d > dist[v] {
                continue;
            }
            settled[v] = true;
            order.push(v);
            for &(w, len) in &lengths[v] {
                if settled[w] {
                    continue;
                }
                let candidate = d + len;
                if candidate < dist[w] {
                    dist[w] = candidate;
                    sigma[w] = sigma[v];
                    preds[w].clear();
                    preds[w].push(v);
                    heap.push(Visit {
                        dist: candidate,
                        node: w,
                    });
                } else if candidate == dist[w] {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0; n];
        for &w in order.iter().rev() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }
    centrality
}

/// Left eigenvector of `A + I` by power iteration, scaled to max 1.
fn eigenvector(g: &DenseGraph) -> (Vec<f64>, bool) {
    let n = g.len();
    if n == 0 {
        return (Vec::new(), true);
    }
    let mut x = vec![1.0 / n as f64; n];
    for _ in 0..MAX_POWER_ITERATIONS {
        let mut next = x.clone();
        for (i, edges) in g.out.iter().enumerate() {
            for &(j, weight) in edges {
                next[j] += weight * x[i];
            }
        }
        let max = next.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if max == 0.0 {
            return (vec![0.0; n], true);
        }
        for v in &mut next {
            *v /= max;
        }
        let change: f64 = next.iter().zip(&x).map(|(a, b)| (a - b).abs()).sum();
        x = next;
        if change < n as f64 * CONVERGENCE_TOLERANCE {
            return (x, true);
        }
    }
    (x, false)
}

/// PageRank with uniform teleport and uniform redistribution of dangling
/// nodes' mass.
fn pagerank(g: &DenseGraph, damping: f64) -> (Vec<f64>, bool) {
    let n = g.len();
    if n == 0 {
        return (Vec::new(), true);
    }
    let size = n as f64;
    let strength: Vec<f64> = g
        .out
        .iter()
        .map(|edges| edges.iter().map(|(_, w)| w).sum::<f64>())
        .collect();
    let mut x = vec![1.0 / size; n];
    for _ in 0..MAX_POWER_ITERATIONS {
        let dangling: f64 = (0..n).filter(|&i| strength[i] <= 0.0).map(|i| x[i]).sum();
        let base = (1.0 - damping) / size + damping * dangling / size;
        let mut next = vec![base; n];
        for (i, edges) in g.out.iter().enumerate() {
            if strength[i] > 0.0 {
                for &(j, weight) in edges {
                    next[j] += damping * x[i] * weight / strength[i];
                }
            }
        }
        let change: f64 = next.iter().zip(&x).map(|(a, b)| (a - b).abs()).sum();
        x = next;
        if change < size * CONVERGENCE_TOLERANCE {
            return (x, true);
        }
    }
    (x, false)
}

// =============================================================================
// AREA FLOWS
// =============================================================================

#[derive(Clone, Copy)]
enum Direction {
    /// Weight received from flagged units.
    From,
    /// Weight sent to flagged units.
    To,
}

fn area_flow(
    dense: &DenseGraph,
    graph: &ConnectivityGraph,
    flagged: Option<&BTreeSet<UnitId>>,
    direction: Direction,
) -> BTreeMap<UnitId, f64> {
    let mut values = dense.map(|_| 0.0);
    let Some(flagged) = flagged else {
        return values;
    };
    for (from, to, weight) in graph.edges() {
        let (partner, unit) = match direction {
            Direction::From => (from, to),
            Direction::To => (to, from),
        };
        if flagged.contains(&partner) {
            *values.entry(unit).or_insert(0.0) += weight;
        }
    }
    values
}

// =============================================================================
// TEMPORAL
// =============================================================================

/// Edge weights over time, with missing edges read as zero.
struct TimeSeries {
    /// `(from, to) -> weight per slice`.
    edges: BTreeMap<(UnitId, UnitId), Vec<f64>>,
    /// Edge keys incident to each unit.
    incident: BTreeMap<UnitId, BTreeSet<(UnitId, UnitId)>>,
}

impl TimeSeries {
    fn new(slices: &[(String, ConnectivityGraph)]) -> Self {
        let t = slices.len();
        let mut edges: BTreeMap<(UnitId, UnitId), Vec<f64>> = BTreeMap::new();
        for (k, (_, graph)) in slices.iter().enumerate() {
            for (from, to, weight) in graph.edges() {
                edges.entry((from, to)).or_insert_with(|| vec![0.0; t])[k] = weight;
            }
        }
        let mut incident: BTreeMap<UnitId, BTreeSet<(UnitId, UnitId)>> = BTreeMap::new();
        for key in edges.keys() {
            incident.entry(key.0).or_default().insert(*key);
            incident.entry(key.1).or_default().insert(*key);
        }
        Self { edges, incident }
    }

    fn series_of(&self, unit: UnitId) -> Vec<&[f64]> {
        self.incident
            .get(&unit)
            .into_iter()
            .flatten()
            .filter_map(|key| self.edges.get(key).map(Vec::as_slice))
            .collect()
    }

    fn mean_variation(&self, unit: UnitId) -> f64 {
        let cvs: Vec<f64> = self
            .series_of(unit)
            .into_iter()
            .filter_map(|s| {
                let m = mean(s);
                (m != 0.0).then(|| variance(s, m).sqrt() / m.abs())
            })
            .collect();
        if cvs.is_empty() { 0.0 } else { mean(&cvs) }
    }

    fn mean_covariance(&self, unit: UnitId) -> f64 {
        let series = self.series_of(unit);
        let means: Vec<f64> = series.iter().map(|s| mean(s)).collect();
        let mut total = 0.0;
        let mut pairs = 0usize;
        for a in 0..series.len() {
            for b in (a + 1)..series.len() {
                total += covariance(series[a], means[a], series[b], means[b]);
                pairs += 1;
            }
        }
        if pairs == 0 { 0.0 } else { total / pairs as f64 }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn variance(values: &[f64], m: f64) -> f64 {
    covariance(values, m, values, m)
}

/// Population covariance.
fn covariance(a: &[f64], ma: f64, b: &[f64], mb: f64) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / a.len() as f64
}

// =============================================================================
// TESTS
// =============================================================================
