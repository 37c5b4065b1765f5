//! # Core Type Definitions
//!
//! This module contains the vocabulary shared by every engine stage:
//! - Unit identifiers (`UnitId`)
//! - Connectivity descriptors (`MatrixType`, `ConnectivitySource`, `UnitScope`)
//! - Structured warnings (`Warning`, `WarningKind`)
//! - Error types (`ConplanError`)
//!
//! ## Determinism Guarantees
//!
//! Every identifier implements `Ord` so that all maps in the engine can be
//! `BTreeMap`/`BTreeSet` and every export is written in a stable order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// UNIT IDENTIFIERS
// =============================================================================

/// Identifier of a spatial unit (planning unit or connectivity unit).
///
/// The optimizer only accepts integer ids, so every file the engine reads
/// must carry integer unit ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnitId {
    type Err = ConplanError;

    /// Parse a unit id, accepting integral floats such as `"12.0"` which
    /// spreadsheet tools like to write.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(v) = trimmed.parse::<u64>() {
            return Ok(Self(v));
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(Self(v as u64)),
            _ => Err(ConplanError::Format(format!(
                "'{}' is not a valid integer unit id",
                trimmed
            ))),
        }
    }
}

// =============================================================================
// CONNECTIVITY DESCRIPTORS
// =============================================================================

/// Declared meaning of the weights in a demographic connectivity matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixType {
    /// Probability that an individual leaving `i` arrives at `j`. Rows sum to 1
    /// unless mortality is modelled.
    Probability,
    /// Proportion of the individuals arriving at `j` that originated at `i`.
    /// Columns sum to 1.
    Migration,
    /// Absolute number of individuals moving from `i` to `j`.
    Flow,
}

impl MatrixType {
    /// Label used in configuration files and messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Probability => "Probability",
            Self::Migration => "Migration",
            Self::Flow => "Flow",
        }
    }
}

impl FromStr for MatrixType {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "probability" => Ok(Self::Probability),
            "migration" => Ok(Self::Migration),
            "flow" => Ok(Self::Flow),
            other => Err(ConplanError::Configuration(format!(
                "Unknown matrix type '{}'. Use: probability, migration, flow",
                other
            ))),
        }
    }
}

/// Which kind of connectivity data a matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivitySource {
    /// Demographic movement (larval dispersal, animal tracking, ...).
    Demographic,
    /// Landscape connectivity derived from habitat resistance.
    Landscape,
}

impl ConnectivitySource {
    /// Short tag used in metric and file names.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Demographic => "demo",
            Self::Landscape => "land",
        }
    }
}

/// Spatial resolution a metric is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitScope {
    /// Planning units (the optimizer's resolution).
    PlanningUnit,
    /// Connectivity units (the resolution the data was measured at).
    ConnectivityUnit,
}

impl UnitScope {
    /// Short tag used in metric and file names.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PlanningUnit => "pu",
            Self::ConnectivityUnit => "cu",
        }
    }
}

impl FromStr for UnitScope {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pu" | "planning_unit" => Ok(Self::PlanningUnit),
            "cu" | "connectivity_unit" => Ok(Self::ConnectivityUnit),
            other => Err(ConplanError::Configuration(format!(
                "Unknown unit scope '{}'. Use: pu, cu",
                other
            ))),
        }
    }
}

// =============================================================================
// WARNINGS
// =============================================================================

/// Category of a recoverable problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Input shape was usable but suspicious.
    Format,
    /// Geometry problem that degraded (but did not abort) a computation.
    Geometry,
    /// Requested output was refused or adjusted because of missing inputs.
    Configuration,
    /// Matrix does not satisfy the invariant of its declared type.
    MatrixType,
}

/// A recoverable problem surfaced to the caller alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// Warning category.
    pub kind: WarningKind,
    /// Human readable description.
    pub message: String,
}

impl Warning {
    /// Create a warning and emit it through `tracing`.
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(kind = ?kind, "{}", message);
        Self { kind, message }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A result value paired with the warnings produced while computing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    /// The computed value.
    pub value: T,
    /// Recoverable problems encountered along the way.
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    /// Wrap a value with the given warnings.
    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    /// Move this outcome's warnings into `sink` and return the value.
    pub fn collect_into(self, sink: &mut Vec<Warning>) -> T {
        sink.extend(self.warnings);
        self.value
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the engine.
///
/// - No silent failures
/// - Every fallible operation returns `Result<T, ConplanError>`
/// - An operation that fails leaves previously computed results untouched
#[derive(Debug, Error)]
pub enum ConplanError {
    /// Input file does not have the expected schema.
    #[error("Format error: {0}")]
    Format(String),

    /// Geometry is invalid or cannot be matched.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// A prerequisite file or option for the request is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external optimizer is missing or unusable.
    #[error("External tool error: {0}")]
    ExternalTool(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A CSV reader or writer failed.
    #[error("CSV error: {0}")]
    Csv(String),

    /// A JSON document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for ConplanError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<csv::Error> for ConplanError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<serde_json::Error> for ConplanError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_parses_integral_floats() {
        assert_eq!("12".parse::<UnitId>().expect("int"), UnitId(12));
        assert_eq!(" 7.0 ".parse::<UnitId>().expect("float"), UnitId(7));
        assert!("7.5".parse::<UnitId>().is_err());
        assert!("-1".parse::<UnitId>().is_err());
        assert!("abc".parse::<UnitId>().is_err());
    }

    #[test]
    fn unit_ids_sort_numerically() {
        let mut ids = vec![UnitId(10), UnitId(2), UnitId(1)];
        ids.sort();
        assert_eq!(ids, vec![UnitId(1), UnitId(2), UnitId(10)]);
    }

    #[test]
    fn matrix_type_from_str() {
        assert_eq!(
            "Migration".parse::<MatrixType>().expect("parse"),
            MatrixType::Migration
        );
        assert!(matches!(
            "dispersal".parse::<MatrixType>(),
            Err(ConplanError::Configuration(_))
        ));
    }

    #[test]
    fn tags() {
        assert_eq!(ConnectivitySource::Demographic.tag(), "demo");
        assert_eq!(UnitScope::PlanningUnit.tag(), "pu");
        assert_eq!("cu".parse::<UnitScope>().expect("scope"), UnitScope::ConnectivityUnit);
    }
}
