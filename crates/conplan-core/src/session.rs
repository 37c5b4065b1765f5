//! # Session
//!
//! Explicit project context threaded through every engine stage: the
//! planning units, optional focus/avoidance areas, the loaded connectivity
//! sources and the metric store.
//!
//! The session is single-owner. Operations that recompute metrics build a
//! complete new store and swap it in only on success, so a failed
//! recalculation leaves earlier results untouched.

use crate::boundary::{BoundaryExport, BoundaryMode, plan_boundaries};
use crate::features::{
    Bound, FeatureConfig, FeatureTables, MetricSummary, assemble_features, discretize,
    metric_summary,
};
use crate::formats::{ConnectivityData, check_matrix_type};
use crate::metrics::{
    Availability, LockRule, MetricConfig, MetricContext, MetricKind, MetricOrigin, MetricStore,
    compute_metrics,
};
use crate::posthoc::{PostHocRow, evaluate};
use crate::progress::Progress;
use crate::rescale::rescale_data;
use crate::spatial::{EdgeRule, SpatialMatcher, UnitSet};
use crate::status::{AreaRule, StatusCode, merge_status};
use crate::{
    ConnectivitySource, ConplanError, MatrixType, Outcome, UnitId, UnitScope, Warning,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine options of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Metric engine options.
    pub metrics: MetricConfig,
    /// Feature assembly options.
    pub features: FeatureConfig,
    /// Edge rule used when rescaling connectivity units.
    pub edge_rule: EdgeRule,
    /// Boundary export mode.
    pub boundary_mode: BoundaryMode,
    /// Status imposed on units in a focus area.
    pub focus_rule: Option<LockRule>,
    /// Status imposed on units in an avoidance area.
    pub avoidance_rule: Option<LockRule>,
    /// Least-path connectivity data is available.
    pub least_path: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metrics: MetricConfig::default(),
            features: FeatureConfig::default(),
            edge_rule: EdgeRule::default(),
            boundary_mode: BoundaryMode::default(),
            focus_rule: Some(LockRule::LockIn),
            avoidance_rule: Some(LockRule::LockOut),
            least_path: false,
        }
    }
}

/// Connectivity handed to [`Session::add_source`].
#[derive(Debug, Clone)]
pub struct SourceInput {
    /// Which source this is.
    pub source: ConnectivitySource,
    /// Parsed connectivity.
    pub data: ConnectivityData,
    /// Declared matrix type (demographic data).
    pub matrix_type: Option<MatrixType>,
    /// Connectivity-unit geometry; `None` when the data already refers to
    /// planning units.
    pub units: Option<UnitSet>,
}

/// Metrics to compute for one source and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRequest {
    /// Source whose data the metrics are computed on.
    pub source: ConnectivitySource,
    /// Units the values are reported for.
    pub scope: UnitScope,
    /// Metrics to compute; ineligible ones are skipped with a warning.
    pub kinds: Vec<MetricKind>,
}

#[derive(Debug, Clone)]
struct LoadedSource {
    matrix_type: Option<MatrixType>,
    /// Connectivity-unit geometry and data, when rescaled.
    connectivity_units: Option<(UnitSet, ConnectivityData)>,
    /// Data on planning units.
    planning: ConnectivityData,
}

// =============================================================================
// SESSION
// =============================================================================

/// A project in memory.
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    planning_units: UnitSet,
    focus_area: Option<UnitSet>,
    avoidance_area: Option<UnitSet>,
    sources: BTreeMap<ConnectivitySource, LoadedSource>,
    metrics: MetricStore,
}

impl Session {
    /// Start a session over a set of planning units.
    #[must_use]
    pub fn new(planning_units: UnitSet, config: SessionConfig) -> Self {
        tracing::info!(planning_units = planning_units.units.len(), "session started");
        Self {
            config,
            planning_units,
            focus_area: None,
            avoidance_area: None,
            sources: BTreeMap::new(),
            metrics: MetricStore::new(),
        }
    }

    /// Session options.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Planning units with their area flags.
    #[must_use]
    pub fn planning_units(&self) -> &UnitSet {
        &self.planning_units
    }

    /// Current metric store.
    #[must_use]
    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    /// Replace the metric store wholesale (e.g. with one loaded from disk).
    pub fn set_metrics(&mut self, metrics: MetricStore) {
        self.metrics = metrics;
    }

    /// Remove one metric by name.
    pub fn remove_metric(&mut self, name: &str) -> Result<(), ConplanError> {
        self.metrics
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ConplanError::Configuration(format!("No metric named '{}'", name)))
    }

    /// Install focus and avoidance areas and re-flag every unit set.
    pub fn set_areas(
        &mut self,
        focus: Option<UnitSet>,
        avoidance: Option<UnitSet>,
    ) -> Result<(), ConplanError> {
        let mut planning_units = self.planning_units.clone();
        planning_units.annotate_areas(focus.as_ref(), avoidance.as_ref())?;
        let mut sources = self.sources.clone();
        for loaded in sources.values_mut() {
            if let Some((units, _)) = &mut loaded.connectivity_units {
                units.annotate_areas(focus.as_ref(), avoidance.as_ref())?;
            }
        }
        self.planning_units = planning_units;
        self.sources = sources;
        self.focus_area = focus;
        self.avoidance_area = avoidance;
        tracing::info!(
            focus = self.planning_units.focus_units().len(),
            avoidance = self.planning_units.avoidance_units().len(),
            "area flags updated"
        );
        Ok(())
    }

    /// Load (or replace) a connectivity source, rescaling it onto the
    /// planning units when it comes with connectivity-unit geometry.
    ///
    /// Metrics previously computed from this source are discarded.
    pub fn add_source(
        &mut self,
        input: SourceInput,
        progress: &dyn Progress,
    ) -> Result<Vec<Warning>, ConplanError> {
        let mut warnings = Vec::new();
        if let Some(matrix_type) = input.matrix_type {
            warnings.extend(check_matrix_type(&input.data.primary(), matrix_type));
        }

        let loaded = match input.units {
            Some(mut units) => {
                input.data.primary().ensure_within(&units.ids())?;
                units.annotate_areas(self.focus_area.as_ref(), self.avoidance_area.as_ref())?;
                let mapping = SpatialMatcher::new(self.config.edge_rule)
                    .match_units(&units, &self.planning_units, progress)?
                    .collect_into(&mut warnings);
                let planning = rescale_data(&input.data, &mapping, progress);
                LoadedSource {
                    matrix_type: input.matrix_type,
                    connectivity_units: Some((units, input.data)),
                    planning,
                }
            }
            None => {
                input
                    .data
                    .primary()
                    .ensure_within(&self.planning_units.ids())?;
                LoadedSource {
                    matrix_type: input.matrix_type,
                    connectivity_units: None,
                    planning: input.data,
                }
            }
        };

        for scope in [UnitScope::PlanningUnit, UnitScope::ConnectivityUnit] {
            self.metrics.replace_computed(input.source, scope, Vec::new());
        }
        self.sources.insert(input.source, loaded);
        tracing::info!(source = input.source.tag(), "connectivity source loaded");
        Ok(warnings)
    }

    /// Connectivity of a source at a scope.
    #[must_use]
    pub fn source_data(
        &self,
        source: ConnectivitySource,
        scope: UnitScope,
    ) -> Option<&ConnectivityData> {
        let loaded = self.sources.get(&source)?;
        match scope {
            UnitScope::PlanningUnit => Some(&loaded.planning),
            UnitScope::ConnectivityUnit => loaded.connectivity_units.as_ref().map(|(_, d)| d),
        }
    }

    /// Sources currently loaded.
    pub fn sources(&self) -> impl Iterator<Item = ConnectivitySource> + '_ {
        self.sources.keys().copied()
    }

    fn scope_units(&self, source: ConnectivitySource, scope: UnitScope) -> Option<&UnitSet> {
        match scope {
            UnitScope::PlanningUnit => Some(&self.planning_units),
            UnitScope::ConnectivityUnit => self
                .sources
                .get(&source)?
                .connectivity_units
                .as_ref()
                .map(|(u, _)| u),
        }
    }

    /// Eligibility snapshot for a source and scope, if that data exists.
    #[must_use]
    pub fn availability(
        &self,
        source: ConnectivitySource,
        scope: UnitScope,
    ) -> Option<Availability> {
        let data = self.source_data(source, scope)?;
        Some(Availability {
            source,
            matrix_type: self.sources.get(&source)?.matrix_type,
            has_focus_area: self.focus_area.is_some(),
            has_avoidance_area: self.avoidance_area.is_some(),
            least_path: self.config.least_path,
            temporal: data.time_slices().is_some(),
        })
    }

    /// Recompute the requested metrics.
    ///
    /// Every request is validated before any computation starts. Computed
    /// metrics of each requested source and scope are replaced wholesale;
    /// the store is swapped only when all requests succeed. Returns the
    /// ineligible kinds that were skipped.
    pub fn recalculate(
        &mut self,
        requests: &[MetricRequest],
        progress: &dyn Progress,
    ) -> Result<Outcome<Vec<MetricKind>>, ConplanError> {
        for request in requests {
            if self.source_data(request.source, request.scope).is_none() {
                return Err(ConplanError::Configuration(format!(
                    "No {} connectivity loaded at {} scope",
                    request.source.tag(),
                    request.scope.tag()
                )));
            }
        }
        self.config.metrics.validate()?;

        let mut next = self.metrics.clone();
        let mut warnings = Vec::new();
        let mut skipped = Vec::new();

        for request in requests {
            let (Some(data), Some(units)) = (
                self.source_data(request.source, request.scope),
                self.scope_units(request.source, request.scope),
            ) else {
                continue;
            };
            let ids = units.ids();
            let focus = self.focus_area.as_ref().map(|_| units.focus_units());
            let avoidance = self.avoidance_area.as_ref().map(|_| units.avoidance_units());
            let ctx = MetricContext {
                source: request.source,
                scope: request.scope,
                data,
                matrix_type: self.sources.get(&request.source).and_then(|s| s.matrix_type),
                least_path: self.config.least_path,
                units: &ids,
                focus_units: focus.as_ref(),
                avoidance_units: avoidance.as_ref(),
            };
            let set = compute_metrics(&ctx, &request.kinds, &self.config.metrics, progress)?
                .collect_into(&mut warnings);
            skipped.extend(set.skipped);
            next.replace_computed(request.source, request.scope, set.results);
        }

        self.metrics = next;
        Ok(Outcome::with_warnings(skipped, warnings))
    }

    /// Add a discretized metric derived from `base`; returns its name.
    pub fn discretize(
        &mut self,
        base: &str,
        from: Bound,
        to: Bound,
        lock: Option<LockRule>,
    ) -> Result<String, ConplanError> {
        let metric = self
            .metrics
            .get(base)
            .ok_or_else(|| ConplanError::Configuration(format!("No metric named '{}'", base)))?;
        let derived = discretize(metric, from, to, lock)?;
        let name = derived.name.clone();
        self.metrics.insert(derived);
        Ok(name)
    }

    /// Feature tables of the selected (or all) planning-unit metrics.
    pub fn features(&self, selected: Option<&[String]>) -> Result<FeatureTables, ConplanError> {
        assemble_features(&self.metrics, selected, &self.config.features)
    }

    /// Status of every planning unit, merged on top of `base`.
    #[must_use]
    pub fn status(&self, base: &BTreeMap<UnitId, StatusCode>) -> BTreeMap<UnitId, StatusCode> {
        let focus = self.planning_units.focus_units();
        let avoidance = self.planning_units.avoidance_units();
        merge_status(
            &self.planning_units.ids(),
            base,
            self.avoidance_area.as_ref().map(|_| AreaRule {
                units: &avoidance,
                rule: self.config.avoidance_rule,
            }),
            self.focus_area.as_ref().map(|_| AreaRule {
                units: &focus,
                rule: self.config.focus_rule,
            }),
            &self.metrics,
        )
    }

    /// Pre-evaluation summary of a metric against the area flags of its
    /// units.
    pub fn metric_summary(&self, name: &str) -> Result<MetricSummary, ConplanError> {
        let metric = self
            .metrics
            .get(name)
            .ok_or_else(|| ConplanError::Configuration(format!("No metric named '{}'", name)))?;
        let units = match (metric.scope, &metric.origin) {
            (UnitScope::PlanningUnit, _) => Some(&self.planning_units),
            (UnitScope::ConnectivityUnit, MetricOrigin::Computed { source, .. }) => {
                self.scope_units(*source, UnitScope::ConnectivityUnit)
            }
            _ => None,
        }
        .ok_or_else(|| {
            ConplanError::Configuration(format!("Units of metric '{}' are not loaded", name))
        })?;
        let focus = self.focus_area.as_ref().map(|_| units.focus_units());
        let avoidance = self.avoidance_area.as_ref().map(|_| units.avoidance_units());
        metric_summary(metric, focus.as_ref(), avoidance.as_ref())
    }

    /// Boundary files for the given sources (all loaded sources when empty).
    #[must_use]
    pub fn boundaries(
        &self,
        sources: &[ConnectivitySource],
        path: &Path,
    ) -> Outcome<Vec<BoundaryExport>> {
        let chosen: BTreeSet<ConnectivitySource> = if sources.is_empty() {
            self.sources.keys().copied().collect()
        } else {
            sources.iter().copied().collect()
        };
        let graphs: Vec<_> = chosen
            .into_iter()
            .filter_map(|s| self.sources.get(&s).map(|l| (s, l.planning.primary())))
            .collect();
        let borrowed: Vec<_> = graphs.iter().map(|(s, g)| (*s, &**g)).collect();
        let has_metrics = self
            .metrics
            .in_scope(UnitScope::PlanningUnit)
            .next()
            .is_some();
        plan_boundaries(&borrowed, self.config.boundary_mode, path, has_metrics)
    }

    /// Post-hoc evaluation of a selection against a source's planning-unit
    /// connectivity.
    pub fn posthoc(
        &self,
        source: ConnectivitySource,
        selection: &BTreeSet<UnitId>,
    ) -> Result<Vec<PostHocRow>, ConplanError> {
        let data = self
            .source_data(source, UnitScope::PlanningUnit)
            .ok_or_else(|| {
                ConplanError::Configuration(format!("No {} connectivity loaded", source.tag()))
            })?;
        Ok(evaluate(data, &self.planning_units.ids(), selection))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConnectivityGraph;
    use crate::progress::NoProgress;
    use crate::spatial::SpatialUnit;
    use geo::{MultiPolygon, polygon};

    fn square(x: f64, y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
        ]])
    }

    fn grid(ids: &[u64]) -> UnitSet {
        UnitSet {
            crs: "local".to_string(),
            units: ids
                .iter()
                .enumerate()
                .map(|(i, id)| SpatialUnit::new(UnitId(*id), square(i as f64, 0.0)))
                .collect(),
        }
    }

    fn flow() -> ConnectivityData {
        let mut g = ConnectivityGraph::with_nodes([UnitId(1), UnitId(2)]);
        g.insert_edge(UnitId(1), UnitId(2), 3.0);
        g.insert_edge(UnitId(2), UnitId(2), 1.0);
        ConnectivityData::Single(g)
    }

    fn session() -> Session {
        let mut s = Session::new(grid(&[1, 2]), SessionConfig::default());
        s.add_source(
            SourceInput {
                source: ConnectivitySource::Demographic,
                data: flow(),
                matrix_type: Some(MatrixType::Flow),
                units: None,
            },
            &NoProgress,
        )
        .expect("source");
        s
    }

    fn request(kinds: Vec<MetricKind>) -> MetricRequest {
        MetricRequest {
            source: ConnectivitySource::Demographic,
            scope: UnitScope::PlanningUnit,
            kinds,
        }
    }

    #[test]
    fn recalculation_computes_and_skips() {
        let mut s = session();
        let outcome = s
            .recalculate(&[request(vec![MetricKind::InDegree, MetricKind::FaDonors])], &NoProgress)
            .expect("recalculate");
        assert_eq!(outcome.value, vec![MetricKind::FaDonors]);
        let inn = s.metrics().get("in_degree_demo_pu").expect("in_degree");
        assert_eq!(inn.values[&UnitId(2)], 4.0);
    }

    #[test]
    fn failed_recalculation_keeps_previous_metrics() {
        let mut s = session();
        s.recalculate(&[request(vec![MetricKind::InDegree])], &NoProgress)
            .expect("first");
        let bad = MetricRequest {
            source: ConnectivitySource::Landscape,
            ..request(vec![MetricKind::InDegree])
        };
        assert!(s.recalculate(&[bad], &NoProgress).is_err());
        assert_eq!(s.metrics().len(), 1);
    }

    #[test]
    fn connectivity_outside_planning_units_is_refused() {
        let mut s = Session::new(grid(&[1]), SessionConfig::default());
        let result = s.add_source(
            SourceInput {
                source: ConnectivitySource::Demographic,
                data: flow(),
                matrix_type: Some(MatrixType::Flow),
                units: None,
            },
            &NoProgress,
        );
        assert!(matches!(result, Err(ConplanError::Format(_))));
    }

    #[test]
    fn focus_area_locks_in_and_enables_metrics() {
        let mut s = session();
        let focus = UnitSet {
            crs: "local".to_string(),
            units: vec![SpatialUnit::new(UnitId(1), square(0.0, 0.0))],
        };
        s.set_areas(Some(focus), None).expect("areas");
        s.recalculate(&[request(vec![MetricKind::FaRecipients])], &NoProgress)
            .expect("recalculate");
        let recipients = s.metrics().get("fa_recipients_demo_pu").expect("metric");
        assert_eq!(recipients.values[&UnitId(2)], 3.0);

        let status = s.status(&BTreeMap::new());
        assert_eq!(status[&UnitId(1)], StatusCode::LockedIn);
        assert_eq!(status[&UnitId(2)], StatusCode::Free);
    }

    #[test]
    fn rescaled_source_keeps_connectivity_unit_scope() {
        let mut s = Session::new(grid(&[1, 2]), SessionConfig::default());
        let mut g = ConnectivityGraph::new();
        g.insert_edge(UnitId(10), UnitId(11), 1.0);
        s.add_source(
            SourceInput {
                source: ConnectivitySource::Landscape,
                data: ConnectivityData::Single(g),
                matrix_type: None,
                units: Some(grid(&[10, 11])),
            },
            &NoProgress,
        )
        .expect("source");
        let pu = s
            .source_data(ConnectivitySource::Landscape, UnitScope::PlanningUnit)
            .expect("pu data");
        assert!((pu.primary().weight(UnitId(1), UnitId(2)) - 1.0).abs() < 1e-9);
        assert!(
            s.source_data(ConnectivitySource::Landscape, UnitScope::ConnectivityUnit)
                .is_some()
        );
    }

    #[test]
    fn metrics_are_removed_individually() {
        let mut s = session();
        s.recalculate(
            &[request(vec![MetricKind::InDegree, MetricKind::OutDegree])],
            &NoProgress,
        )
        .expect("recalculate");
        s.remove_metric("in_degree_demo_pu").expect("remove");
        assert!(s.metrics().get("in_degree_demo_pu").is_none());
        assert!(s.metrics().get("out_degree_demo_pu").is_some());
        assert!(matches!(
            s.remove_metric("in_degree_demo_pu"),
            Err(ConplanError::Configuration(_))
        ));
    }

    #[test]
    fn summary_uses_planning_unit_area_flags() {
        let mut s = session();
        let focus = UnitSet {
            crs: "local".to_string(),
            units: vec![SpatialUnit::new(UnitId(2), square(1.0, 0.0))],
        };
        s.set_areas(Some(focus), None).expect("areas");
        s.recalculate(&[request(vec![MetricKind::InDegree])], &NoProgress)
            .expect("recalculate");
        let summary = s.metric_summary("in_degree_demo_pu").expect("summary");
        assert_eq!(summary.sum, 4.0);
        assert_eq!(summary.focus_percent, Some(100.0));
        assert_eq!(summary.avoidance_percent, None);
        assert!(s.metric_summary("google_demo_pu").is_err());
    }
}
