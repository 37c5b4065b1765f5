//! # Status Exporter
//!
//! Merges area rules and metric lock rules into a per-unit optimizer status
//! and writes it into a `pu.dat` table.
//!
//! Merge order (later writers win):
//! 1. every unit starts from its base status: the `status` column of an
//!    existing `pu.dat`, free (0) otherwise
//! 2. avoidance-area rule on units flagged `in_avoidance_area`
//! 3. focus-area rule on units flagged `in_focus_area`
//! 4. each planning-unit lock-rule metric, in creation order, on units
//!    with a non-zero value

use crate::formats::Table;
use crate::metrics::{LockRule, MetricStore};
use crate::primitives::DEFAULT_PU_COST;
use crate::{ConplanError, UnitId, UnitScope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Optimizer planning-unit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum StatusCode {
    /// Free to be selected or not.
    #[default]
    Free,
    /// Part of the optimizer's initial reserve. Only carried over from an
    /// existing table.
    Initial,
    /// Always selected.
    LockedIn,
    /// Never selected.
    LockedOut,
}

impl StatusCode {
    /// Numeric code written to `pu.dat`.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Initial => 1,
            Self::LockedIn => 2,
            Self::LockedOut => 3,
        }
    }
}

impl FromStr for StatusCode {
    type Err = ConplanError;

    /// Parse a `pu.dat` status cell (`0`..`3`; `2.0` style cells allowed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().parse::<f64>().ok();
        match code {
            Some(c) if c == 0.0 => Ok(Self::Free),
            Some(c) if c == 1.0 => Ok(Self::Initial),
            Some(c) if c == 2.0 => Ok(Self::LockedIn),
            Some(c) if c == 3.0 => Ok(Self::LockedOut),
            _ => Err(ConplanError::Format(format!(
                "Invalid planning-unit status '{}'; expected 0, 1, 2 or 3",
                s
            ))),
        }
    }
}

impl From<LockRule> for StatusCode {
    fn from(rule: LockRule) -> Self {
        match rule {
            LockRule::LockIn => Self::LockedIn,
            LockRule::LockOut => Self::LockedOut,
        }
    }
}

/// An area layer and the status it imposes on the units it flags.
#[derive(Debug, Clone, Copy)]
pub struct AreaRule<'a> {
    /// Units flagged by the area.
    pub units: &'a BTreeSet<UnitId>,
    /// Status imposed; `None` leaves the units untouched.
    pub rule: Option<LockRule>,
}

/// Base status of every unit of an existing planning-unit table; empty when
/// the table has no `status` column.
pub fn base_status(table: &Table) -> Result<BTreeMap<UnitId, StatusCode>, ConplanError> {
    let Some(status_col) = table.column("status") else {
        return Ok(BTreeMap::new());
    };
    let ids = table.unit_ids(table.require_column("id")?)?;
    table
        .rows
        .iter()
        .zip(ids)
        .map(|(row, id)| -> Result<(UnitId, StatusCode), ConplanError> {
            let cell = row.get(status_col).map(String::as_str).unwrap_or_default();
            Ok((id, cell.parse::<StatusCode>()?))
        })
        .collect()
}

/// Merge area rules and lock-rule metrics into a status per unit, on top of
/// `base` (units absent from it start free).
#[must_use]
pub fn merge_status(
    units: &BTreeSet<UnitId>,
    base: &BTreeMap<UnitId, StatusCode>,
    avoidance: Option<AreaRule<'_>>,
    focus: Option<AreaRule<'_>>,
    metrics: &MetricStore,
) -> BTreeMap<UnitId, StatusCode> {
    let mut status: BTreeMap<UnitId, StatusCode> = units
        .iter()
        .map(|id| (*id, base.get(id).copied().unwrap_or_default()))
        .collect();

    for area in [avoidance, focus].into_iter().flatten() {
        if let Some(rule) = area.rule {
            for id in area.units {
                if let Some(slot) = status.get_mut(id) {
                    *slot = rule.into();
                }
            }
        }
    }

    for metric in metrics.in_scope(UnitScope::PlanningUnit) {
        let Some(rule) = metric.lock_rule() else {
            continue;
        };
        for (id, value) in &metric.values {
            if *value != 0.0 {
                if let Some(slot) = status.get_mut(id) {
                    *slot = rule.into();
                }
            }
        }
        tracing::debug!(metric = %metric.name, "lock rule applied");
    }
    status
}

/// Write `status` into a planning-unit table.
///
/// With an existing table every column is preserved and the `status` column
/// is rewritten (appended as free if absent); rows of units missing from
/// `status` keep their cell. Without one, a fresh `id,cost,status` table is
/// built.
pub fn apply_status(
    table: Option<Table>,
    status: &BTreeMap<UnitId, StatusCode>,
) -> Result<Table, ConplanError> {
    let Some(mut table) = table else {
        let mut fresh = Table::new(["id", "cost", "status"]);
        fresh.rows = status
            .iter()
            .map(|(id, s)| {
                vec![
                    id.to_string(),
                    DEFAULT_PU_COST.to_string(),
                    s.code().to_string(),
                ]
            })
            .collect();
        return Ok(fresh);
    };

    let id_col = table.require_column("id")?;
    let ids = table.unit_ids(id_col)?;
    let status_col = match table.column("status") {
        Some(col) => col,
        None => table.push_column("status", "0"),
    };
    for (row, id) in table.rows.iter_mut().zip(ids) {
        if let (Some(code), Some(cell)) = (status.get(&id), row.get_mut(status_col)) {
            *cell = code.code().to_string();
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricOrigin, MetricResult};

    fn ids(v: &[u64]) -> BTreeSet<UnitId> {
        v.iter().map(|i| UnitId(*i)).collect()
    }

    fn lock_metric(name: &str, lock: LockRule, flagged: &[u64]) -> MetricResult {
        MetricResult {
            name: name.to_string(),
            origin: MetricOrigin::Discretized {
                base: "in_degree_demo_pu".to_string(),
                lock: Some(lock),
            },
            scope: UnitScope::PlanningUnit,
            values: (1..=4)
                .map(|i| (UnitId(i), if flagged.contains(&i) { 1.0 } else { 0.0 }))
                .collect(),
        }
    }

    #[test]
    fn later_rules_override_earlier_ones() {
        let units = ids(&[1, 2, 3, 4]);
        let avoid = ids(&[1, 2]);
        let focus = ids(&[2, 3]);
        let mut metrics = MetricStore::new();
        metrics.insert(lock_metric("a_lockout", LockRule::LockOut, &[3]));
        metrics.insert(lock_metric("b_lockin", LockRule::LockIn, &[1]));

        let status = merge_status(
            &units,
            &BTreeMap::new(),
            Some(AreaRule {
                units: &avoid,
                rule: Some(LockRule::LockOut),
            }),
            Some(AreaRule {
                units: &focus,
                rule: Some(LockRule::LockIn),
            }),
            &metrics,
        );
        let codes: Vec<u8> = status.values().map(|s| s.code()).collect();
        assert_eq!(codes, vec![2, 2, 3, 0]);
    }

    #[test]
    fn existing_table_keeps_columns() {
        let table = Table::parse("id,cost,xloc\n1,5,0.5\n2,7,1.5\n").expect("pu");
        let status: BTreeMap<_, _> = [(UnitId(2), StatusCode::LockedOut)].into_iter().collect();
        let out = apply_status(Some(table), &status).expect("status");
        assert_eq!(out.headers, vec!["id", "cost", "xloc", "status"]);
        assert_eq!(out.rows[0], vec!["1", "5", "0.5", "0"]);
        assert_eq!(out.rows[1][3], "3");
    }

    #[test]
    fn fresh_table_has_default_cost() {
        let status: BTreeMap<_, _> = [(UnitId(1), StatusCode::LockedIn)].into_iter().collect();
        let out = apply_status(None, &status).expect("status");
        assert_eq!(out.rows, vec![vec!["1", "1", "2"]]);
    }

    #[test]
    fn existing_status_seeds_the_merge() {
        let table = Table::parse("id,cost,status\n1,1,2\n2,1,3\n3,1,1\n4,1,0\n").expect("pu");
        let base = base_status(&table).expect("base");
        let focus = ids(&[4]);
        let status = merge_status(
            &ids(&[1, 2, 3, 4]),
            &base,
            None,
            Some(AreaRule {
                units: &focus,
                rule: Some(LockRule::LockIn),
            }),
            &MetricStore::new(),
        );
        let out = apply_status(Some(table), &status).expect("status");
        let codes: Vec<&str> = out.rows.iter().map(|r| r[2].as_str()).collect();
        assert_eq!(codes, vec!["2", "3", "1", "2"]);
    }

    #[test]
    fn rules_override_existing_status() {
        let table = Table::parse("id\tstatus\n1\t2.0\n2\t0\n").expect("pu");
        let base = base_status(&table).expect("base");
        assert_eq!(base[&UnitId(1)], StatusCode::LockedIn);
        let mut metrics = MetricStore::new();
        metrics.insert(lock_metric("a_lockout", LockRule::LockOut, &[1]));
        let status = merge_status(&ids(&[1, 2]), &base, None, None, &metrics);
        assert_eq!(status[&UnitId(1)], StatusCode::LockedOut);
        assert_eq!(status[&UnitId(2)], StatusCode::Free);
    }

    #[test]
    fn malformed_status_is_a_format_error() {
        let table = Table::parse("id,status\n1,5\n").expect("pu");
        assert!(matches!(base_status(&table), Err(ConplanError::Format(_))));
        let no_status = Table::parse("id,cost\n1,1\n").expect("pu");
        assert!(base_status(&no_status).expect("base").is_empty());
    }
}
