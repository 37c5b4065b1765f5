//! # Feature Assembler
//!
//! Turns planning-unit metrics into optimizer conservation features:
//! a spec table (`id,target,spf,name`) and an amount table
//! (`species,pu,amount`).
//!
//! Also hosts discretization, which thresholds a metric into a binary
//! metric that may carry a lock rule for the status exporter.

use crate::formats::Table;
use crate::metrics::{LockRule, MetricOrigin, MetricResult, MetricStore};
use crate::primitives::{DEFAULT_SPF, DEFAULT_TARGET_FRACTION, LOCKIN_SUFFIX, LOCKOUT_SUFFIX};
use crate::{ConplanError, UnitId, UnitScope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// FEATURE TABLES
// =============================================================================

/// One conservation feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Feature id, unique within `spec.dat`.
    pub id: u64,
    /// Amount the optimizer must protect.
    pub target: f64,
    /// Species penalty factor.
    pub spf: f64,
    /// Feature name.
    pub name: String,
}

/// Amount of one feature in one planning unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureAmount {
    /// Feature id.
    pub species: u64,
    /// Planning unit id.
    pub pu: UnitId,
    /// Non-zero amount.
    pub amount: f64,
}

/// A spec table with its amount table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTables {
    /// Features in id order.
    pub specs: Vec<FeatureSpec>,
    /// Amounts sorted by `(pu, species)`.
    pub amounts: Vec<FeatureAmount>,
    /// Spec table read from disk. Its rows lead `specs` and are written
    /// back with every original column.
    existing: Option<Table>,
}

/// Options of feature assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Fraction of each metric's total used as target, in `[0, 1]`.
    pub target_fraction: f64,
    /// Per-metric overrides of `target_fraction`, keyed by metric name.
    pub fractions: BTreeMap<String, f64>,
    /// Species penalty factor of every feature.
    pub spf: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_fraction: DEFAULT_TARGET_FRACTION,
            fractions: BTreeMap::new(),
            spf: DEFAULT_SPF,
        }
    }
}

impl FeatureConfig {
    fn fraction_for(&self, name: &str) -> Result<f64, ConplanError> {
        let fraction = self
            .fractions
            .get(name)
            .copied()
            .unwrap_or(self.target_fraction);
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConplanError::Configuration(format!(
                "Target fraction for '{}' must lie in [0, 1], got {}",
                name, fraction
            )));
        }
        Ok(fraction)
    }
}

/// Build feature tables from the planning-unit metrics of `store`.
///
/// `selected` restricts (and orders) the metrics by name; `None` takes every
/// planning-unit metric in creation order. Lock-rule metrics never become
/// features. Ids are assigned `1..=n`.
pub fn assemble_features(
    store: &MetricStore,
    selected: Option<&[String]>,
    config: &FeatureConfig,
) -> Result<FeatureTables, ConplanError> {
    let metrics: Vec<&MetricResult> = match selected {
        Some(names) => names
            .iter()
            .map(|name| {
                store.get(name).ok_or_else(|| {
                    ConplanError::Configuration(format!("No metric named '{}'", name))
                })
            })
            .collect::<Result<_, _>>()?,
        None => store.in_scope(UnitScope::PlanningUnit).collect(),
    };

    let mut tables = FeatureTables::default();
    let mut next_id = 1u64;
    for metric in metrics {
        if metric.scope != UnitScope::PlanningUnit {
            return Err(ConplanError::Configuration(format!(
                "'{}' is a connectivity-unit metric; only planning-unit metrics can become features",
                metric.name
            )));
        }
        if metric.lock_rule().is_some() {
            tracing::debug!(metric = %metric.name, "lock rule metric not exported as feature");
            continue;
        }
        let fraction = config.fraction_for(&metric.name)?;
        tables.specs.push(FeatureSpec {
            id: next_id,
            target: metric.total() * fraction,
            spf: config.spf,
            name: metric.name.clone(),
        });
        tables.amounts.extend(
            metric
                .values
                .iter()
                .filter(|(_, v)| **v != 0.0)
                .map(|(pu, amount)| FeatureAmount {
                    species: next_id,
                    pu: *pu,
                    amount: *amount,
                }),
        );
        next_id += 1;
    }
    tables.sort_amounts();
    tracing::info!(
        features = tables.specs.len(),
        amounts = tables.amounts.len(),
        "features assembled"
    );
    Ok(tables)
}

impl FeatureTables {
    fn sort_amounts(&mut self) {
        self.amounts.sort_by_key(|a| (a.pu, a.species));
    }

    /// Highest feature id, 0 when empty.
    #[must_use]
    pub fn max_id(&self) -> u64 {
        self.specs.iter().map(|s| s.id).max().unwrap_or(0)
    }

    /// Append `new` after `self`, shifting its ids by `self.max_id()`.
    /// Zero amounts are dropped from the merged table. The spec table of
    /// `self`, if it was read from disk, stays the head of the result.
    #[must_use]
    pub fn append(mut self, new: FeatureTables) -> FeatureTables {
        let offset = self.max_id();
        self.specs.extend(new.specs.into_iter().map(|mut s| {
            s.id += offset;
            s
        }));
        self.amounts.extend(new.amounts.into_iter().map(|mut a| {
            a.species += offset;
            a
        }));
        self.amounts.retain(|a| a.amount != 0.0);
        self.sort_amounts();
        tracing::info!(offset, features = self.specs.len(), "feature tables appended");
        self
    }

    /// Spec table with columns `id,target,spf,name`.
    ///
    /// Tables read with [`FeatureTables::from_tables`] keep their own
    /// columns; appended features fill the columns they lack with `0`, as do
    /// existing rows for `target`, `spf` or `name` when those were absent.
    #[must_use]
    pub fn spec_table(&self) -> Table {
        let (mut table, skip) = match &self.existing {
            Some(existing) => (existing.clone(), existing.rows.len()),
            None => (Table::new(["id", "target", "spf", "name"]), 0),
        };
        for s in self.specs.iter().skip(skip) {
            table.push_named(
                &[
                    ("id", s.id.to_string()),
                    ("target", s.target.to_string()),
                    ("spf", s.spf.to_string()),
                    ("name", s.name.clone()),
                ],
                "0",
            );
        }
        table
    }

    /// Amount table with columns `species,pu,amount`.
    #[must_use]
    pub fn amount_table(&self) -> Table {
        let mut table = Table::new(["species", "pu", "amount"]);
        table.rows = self
            .amounts
            .iter()
            .map(|a| vec![a.species.to_string(), a.pu.to_string(), a.amount.to_string()])
            .collect();
        table
    }

    /// Read existing spec and amount tables. Only `id` (spec) and
    /// `species,pu,amount` are required. In `specs`, a missing `target` or
    /// `spf` reads 0 and a missing `name` reads empty; the spec table itself
    /// is kept as read and reproduced by [`FeatureTables::spec_table`].
    pub fn from_tables(spec: &Table, amounts: &Table) -> Result<Self, ConplanError> {
        let id_col = spec.require_column("id")?;
        let ids = spec.unit_ids(id_col)?;
        let numbers = |name: &str| -> Result<Vec<f64>, ConplanError> {
            match spec.column(name) {
                Some(col) => spec.numbers(col),
                None => Ok(vec![0.0; spec.rows.len()]),
            }
        };
        let targets = numbers("target")?;
        let spfs = numbers("spf")?;
        let name_col = spec.column("name");

        let specs = spec
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| FeatureSpec {
                id: ids[i].value(),
                target: targets[i],
                spf: spfs[i],
                name: name_col
                    .and_then(|c| row.get(c).cloned())
                    .unwrap_or_default(),
            })
            .collect();

        let species = amounts.unit_ids(amounts.require_column("species")?)?;
        let pus = amounts.unit_ids(amounts.require_column("pu")?)?;
        let values = amounts.numbers(amounts.require_column("amount")?)?;
        let amounts = species
            .into_iter()
            .zip(pus)
            .zip(values)
            .map(|((s, pu), amount)| FeatureAmount {
                species: s.value(),
                pu,
                amount,
            })
            .collect();

        Ok(Self {
            specs,
            amounts,
            existing: Some(spec.clone()),
        })
    }
}

/// Sibling path used by append mode: `spec.dat` -> `spec_appended.dat`.
#[must_use]
pub fn appended_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_appended.{}", stem, ext.to_string_lossy()),
        None => format!("{}_appended", stem),
    };
    path.with_file_name(name)
}

// =============================================================================
// DISCRETIZATION
// =============================================================================

/// One end of a discretization interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Minimum,
    LowerQuartile,
    Median,
    UpperQuartile,
    Maximum,
    /// Percentile rank in `[0, 100]`.
    Percentile(f64),
    /// Literal metric value.
    Value(f64),
}

impl Bound {
    /// Resolve the bound against metric values (linear interpolation
    /// between closest ranks for percentiles).
    pub fn resolve(&self, values: &[f64]) -> Result<f64, ConplanError> {
        let rank = match *self {
            Self::Value(v) => return Ok(v),
            Self::Minimum => 0.0,
            Self::LowerQuartile => 25.0,
            Self::Median => 50.0,
            Self::UpperQuartile => 75.0,
            Self::Maximum => 100.0,
            Self::Percentile(p) => p,
        };
        if !(0.0..=100.0).contains(&rank) {
            return Err(ConplanError::Configuration(format!(
                "Percentile must lie in [0, 100], got {}",
                rank
            )));
        }
        percentile(values, rank).ok_or_else(|| {
            ConplanError::Configuration("Cannot take a percentile of an empty metric".to_string())
        })
    }

    /// Name fragment describing the bound.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Minimum => "minimum".to_string(),
            Self::LowerQuartile => "lower_quartile".to_string(),
            Self::Median => "median".to_string(),
            Self::UpperQuartile => "upper_quartile".to_string(),
            Self::Maximum => "maximum".to_string(),
            Self::Percentile(p) => format!("{}th_percentile", p),
            Self::Value(v) => format!("{}_value", v),
        }
    }
}

impl FromStr for Bound {
    type Err = ConplanError;

    /// Accepts `min`, `lq`, `median`, `uq`, `max` (or their long names),
    /// `p<rank>` and `v<value>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let number = |rest: &str| {
            rest.trim_start_matches(':').parse::<f64>().map_err(|_| {
                ConplanError::Configuration(format!("Invalid bound '{}'", s))
            })
        };
        match s.as_str() {
            "min" | "minimum" => Ok(Self::Minimum),
            "lq" | "lower_quartile" => Ok(Self::LowerQuartile),
            "median" => Ok(Self::Median),
            "uq" | "upper_quartile" => Ok(Self::UpperQuartile),
            "max" | "maximum" => Ok(Self::Maximum),
            other => {
                if let Some(rest) = other.strip_prefix('p') {
                    Ok(Self::Percentile(number(rest)?))
                } else if let Some(rest) = other.strip_prefix('v') {
                    Ok(Self::Value(number(rest)?))
                } else {
                    Err(ConplanError::Configuration(format!(
                        "Invalid bound '{}'. Use: min, lq, median, uq, max, p<rank>, v<value>",
                        other
                    )))
                }
            }
        }
    }
}

/// Percentile with linear interpolation between closest ranks.
#[must_use]
pub fn percentile(values: &[f64], rank: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = sorted.len().checked_sub(1)?;
    let position = rank / 100.0 * last as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let (a, b) = (sorted.get(lo)?, sorted.get(hi)?);
    Some(a + (b - a) * (position - lo as f64))
}

/// Threshold `metric` into a binary metric: 1 where `from ≤ value ≤ to`.
///
/// The result is named `<metric>_<from>_to_<to>` plus `_lockin` /
/// `_lockout` when it carries a lock rule.
pub fn discretize(
    metric: &MetricResult,
    from: Bound,
    to: Bound,
    lock: Option<LockRule>,
) -> Result<MetricResult, ConplanError> {
    let values: Vec<f64> = metric.values.values().copied().collect();
    let low = from.resolve(&values)?;
    let high = to.resolve(&values)?;

    let suffix = match lock {
        Some(LockRule::LockIn) => LOCKIN_SUFFIX,
        Some(LockRule::LockOut) => LOCKOUT_SUFFIX,
        None => "",
    };
    let name = format!("{}_{}_to_{}{}", metric.name, from.tag(), to.tag(), suffix);
    tracing::info!(%name, low, high, "metric discretized");

    Ok(MetricResult {
        name,
        origin: MetricOrigin::Discretized {
            base: metric.name.clone(),
            lock,
        },
        scope: metric.scope,
        values: metric
            .values
            .iter()
            .map(|(id, v)| (*id, if *v >= low && *v <= high { 1.0 } else { 0.0 }))
            .collect(),
    })
}

// =============================================================================
// PRE-EVALUATION
// =============================================================================

/// Distribution of one metric, with the share of its total held by the
/// focus and avoidance areas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Total over every unit of the metric.
    pub sum: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub lower_quartile: f64,
    pub median: f64,
    pub upper_quartile: f64,
    pub max: f64,
    /// Percent of `sum` on units in the avoidance area. `None` without an
    /// avoidance area or when `sum` is zero.
    pub avoidance_percent: Option<f64>,
    /// Percent of `sum` on units in the focus area.
    pub focus_percent: Option<f64>,
}

/// Summarize `metric` before optimization.
///
/// `focus` and `avoidance` are the flagged units of the metric's scope.
pub fn metric_summary(
    metric: &MetricResult,
    focus: Option<&BTreeSet<UnitId>>,
    avoidance: Option<&BTreeSet<UnitId>>,
) -> Result<MetricSummary, ConplanError> {
    let values: Vec<f64> = metric.values.values().copied().collect();
    let quantile = |rank: f64| {
        percentile(&values, rank).ok_or_else(|| {
            ConplanError::Configuration(format!("Metric '{}' has no values", metric.name))
        })
    };
    let min = quantile(0.0)?;
    let lower_quartile = quantile(25.0)?;
    let median = quantile(50.0)?;
    let upper_quartile = quantile(75.0)?;
    let max = quantile(100.0)?;

    let sum: f64 = values.iter().sum();
    let mean = sum / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    let share = |area: Option<&BTreeSet<UnitId>>| {
        let area = area?;
        if sum == 0.0 {
            return None;
        }
        let inside: f64 = metric
            .values
            .iter()
            .filter(|(id, _)| area.contains(id))
            .map(|(_, v)| v)
            .sum();
        Some(inside / sum * 100.0)
    };

    Ok(MetricSummary {
        sum,
        mean,
        std: variance.sqrt(),
        min,
        lower_quartile,
        median,
        upper_quartile,
        max,
        avoidance_percent: share(avoidance),
        focus_percent: share(focus),
    })
}

// =============================================================================
// TESTS
// =============================================================================
