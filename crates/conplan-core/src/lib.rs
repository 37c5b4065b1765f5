//! # conplan-core
//!
//! The connectivity-metric engine for conservation planning.
//!
//! Data flows strictly downstream:
//!
//! ```text
//! geometries / matrices -> canonical graph -> metrics -> features / status / boundary
//!                                                     -> optimizer files -> post-hoc
//! ```
//!
//! ## Components
//!
//! - `spatial`: matches connectivity units to planning units (rescaling mapping)
//! - `formats` + `rescale`: parse connectivity and compose it onto planning units
//! - `metrics`: per-unit graph metrics behind a declarative eligibility table
//! - `features`: conservation features, discretization, append mode
//! - `boundary` + `status`: optimizer boundary and planning-unit status files
//! - `posthoc`: connectivity retained by a solution
//! - `marxan`: optimizer input file, executable lookup, solution files
//!
//! ## Architectural Constraints
//!
//! - Pure synchronous Rust: no async, no network, no process spawning
//! - Deterministic: every unit-keyed map is a `BTreeMap`
//! - Every stage maps `{inputs, config}` to `{outputs, warnings}`; state
//!   lives only in an explicit [`Session`]

// =============================================================================
// MODULES
// =============================================================================

pub mod boundary;
pub mod features;
pub mod formats;
pub mod graph;
pub mod marxan;
pub mod metrics;
pub mod posthoc;
pub mod primitives;
pub mod progress;
pub mod rescale;
pub mod session;
pub mod spatial;
pub mod status;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    ConnectivitySource, ConplanError, MatrixType, Outcome, UnitId, UnitScope, Warning, WarningKind,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use boundary::{BoundaryExport, BoundaryMode, BoundaryRow, connectivity_boundary};
pub use features::{
    Bound, FeatureConfig, FeatureSpec, FeatureTables, MetricSummary, assemble_features, discretize,
    metric_summary,
};
pub use graph::ConnectivityGraph;
pub use metrics::{
    Availability, FlowMode, LockRule, MetricConfig, MetricContext, MetricKind, MetricOrigin,
    MetricResult, MetricStore, compute_metrics,
};
pub use posthoc::{PostHocRow, evaluate};
pub use progress::{NoProgress, Progress, TracingProgress};
pub use rescale::{rescale_data, rescale_graph};
pub use session::{MetricRequest, Session, SessionConfig, SourceInput};
pub use spatial::{EdgeRule, RescalingMapping, SpatialMatcher, SpatialUnit, UnitSet};
pub use status::{StatusCode, apply_status, base_status, merge_status};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use formats::{
    ConnectivityData, GeometryDocument, MatrixFormat, Table, parse_connectivity,
    read_connectivity, read_geometry, write_connectivity,
};
pub use marxan::{InputDat, OutputSelection, locate_optimizer};
