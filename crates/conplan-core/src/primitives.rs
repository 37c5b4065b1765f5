//! # Engine Primitives
//!
//! Compiled-in defaults and numeric limits for the engine.
//!
//! Configuration structs start from these values; every one of them can be
//! overridden per project.

/// Default PageRank damping factor.
pub const DEFAULT_DAMPING: f64 = 0.85;

/// Default species penalty factor assigned to generated conservation features.
pub const DEFAULT_SPF: f64 = 1000.0;

/// Default fraction of a metric's total used as the feature target.
pub const DEFAULT_TARGET_FRACTION: f64 = 0.5;

/// Absolute tolerance for "sums to one" checks (partition of unity,
/// Migration column sums, Probability row sums).
pub const SUM_TOLERANCE: f64 = 1e-6;

/// Convergence threshold (L1 change between iterations) for PageRank and
/// eigenvector centrality.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-12;

/// Iteration cap for power-iteration algorithms.
pub const MAX_POWER_ITERATIONS: usize = 10_000;

/// Planning-unit count above which spatial matching uses an R-tree instead
/// of testing every pair.
pub const SPATIAL_INDEX_THRESHOLD: usize = 32;

/// Reserved `time` value marking the across-time mean rows of an
/// "Edge List with Time" file.
pub const MEAN_TIME_LABEL: &str = "mean";

/// Suffix of metrics that lock their flagged units out of the solution.
pub const LOCKOUT_SUFFIX: &str = "_lockout";

/// Suffix of metrics that lock their flagged units into the solution.
pub const LOCKIN_SUFFIX: &str = "_lockin";

/// Default cost written for planning units when no pu table is supplied.
pub const DEFAULT_PU_COST: f64 = 1.0;
