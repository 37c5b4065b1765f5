//! # Project Configuration
//!
//! A `conplan.toml` file names every input of a project and every option the
//! engine recognizes. Relative paths are resolved against the directory of
//! the project file.
//!
//! ```toml
//! planning_units = "pu.json"
//! focus_area = "focus.json"
//!
//! [demographic]
//! matrix = "larvae.csv"
//! format = "edge_list"
//! matrix_type = "migration"
//! units = "reefs.json"
//!
//! [metrics]
//! demographic = ["in_degree", "google", "fa_recipients"]
//!
//! [engine]
//! edge_rule = "split"
//! boundary_mode = "asymmetric"
//!
//! [engine.metrics]
//! damping = 0.85
//!
//! [export]
//! output_dir = "marxan/input"
//! input_dat = "marxan/input.dat"
//! ```

use conplan_core::progress::Progress;
use conplan_core::{
    ConnectivitySource, ConplanError, MatrixFormat, MatrixType, MetricKind, MetricRequest,
    Outcome, Session, SessionConfig, SourceInput, UnitScope, UnitSet, read_connectivity,
    read_geometry,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default project file name.
pub const DEFAULT_PROJECT_FILE: &str = "conplan.toml";

// =============================================================================
// SECTIONS
// =============================================================================

/// Whole project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Planning-unit geometry document.
    pub planning_units: PathBuf,
    /// Focus-area geometry document.
    #[serde(default)]
    pub focus_area: Option<PathBuf>,
    /// Avoidance-area geometry document.
    #[serde(default)]
    pub avoidance_area: Option<PathBuf>,
    /// Demographic connectivity.
    #[serde(default)]
    pub demographic: Option<SourceConfig>,
    /// Landscape connectivity.
    #[serde(default)]
    pub landscape: Option<SourceConfig>,
    /// Metric selection.
    #[serde(default)]
    pub metrics: MetricSelection,
    /// Engine options.
    #[serde(default)]
    pub engine: SessionConfig,
    /// Export destinations.
    #[serde(default)]
    pub export: ExportConfig,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One connectivity source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connectivity file.
    pub matrix: PathBuf,
    /// Tabular shape of `matrix`.
    #[serde(default = "default_format")]
    pub format: MatrixFormat,
    /// Declared matrix type (demographic data).
    #[serde(default)]
    pub matrix_type: Option<MatrixType>,
    /// Connectivity-unit geometry; absent when `matrix` already refers to
    /// planning units.
    #[serde(default)]
    pub units: Option<PathBuf>,
}

fn default_format() -> MatrixFormat {
    MatrixFormat::Matrix
}

/// Metric names per source; an empty list requests every metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSelection {
    /// Metric names for the demographic source.
    pub demographic: Vec<String>,
    /// Metric names for the landscape source.
    pub landscape: Vec<String>,
    /// Also compute metrics at connectivity-unit scope for rescaled sources.
    pub connectivity_units: bool,
}

/// Where exported optimizer files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory every file below is written to.
    pub output_dir: PathBuf,
    /// Feature specification file name.
    pub spec: String,
    /// Feature amounts file name.
    pub amounts: String,
    /// Boundary file name; suffixed per source when several are active.
    pub boundary: String,
    /// Planning-unit status file name.
    pub pu: String,
    /// Existing planning-unit table whose columns are preserved.
    pub existing_pu: Option<PathBuf>,
    /// Metrics exported as features; all planning-unit metrics when absent.
    pub features: Option<Vec<String>>,
    /// Append to existing spec/amount tables instead of overwriting.
    pub append: bool,
    /// Optimizer input file updated to match the boundary mode.
    pub input_dat: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("input"),
            spec: "spec.dat".to_string(),
            amounts: "puvspr.dat".to_string(),
            boundary: "bound.dat".to_string(),
            pu: "pu.dat".to_string(),
            existing_pu: None,
            features: None,
            append: false,
            input_dat: None,
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl ProjectConfig {
    /// Parse a project from TOML text.
    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConplanError> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| ConplanError::Configuration(format!("Invalid project file: {}", e)))?;
        config.base_dir = base_dir.into();
        config.engine.metrics.validate()?;
        Ok(config)
    }

    /// Read a project file.
    pub fn load(path: &Path) -> Result<Self, ConplanError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConplanError::Configuration(format!(
                "Cannot read project file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::debug!(path = %path.display(), "project file loaded");
        Self::parse(&text, base_dir)
    }

    /// Resolve a project-relative path.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Resolve a file name inside the export directory.
    #[must_use]
    pub fn export_path(&self, name: &str) -> PathBuf {
        self.resolve(&self.export.output_dir).join(name)
    }

    fn read_units(&self, path: &Path) -> Result<UnitSet, ConplanError> {
        UnitSet::from_document(&read_geometry(self.resolve(path))?)
    }

    fn sources(&self) -> impl Iterator<Item = (ConnectivitySource, &SourceConfig)> {
        [
            (ConnectivitySource::Demographic, self.demographic.as_ref()),
            (ConnectivitySource::Landscape, self.landscape.as_ref()),
        ]
        .into_iter()
        .filter_map(|(source, config)| config.map(|c| (source, c)))
    }

    /// Session over the planning units and areas, without connectivity.
    pub fn open_areas(&self) -> Result<Session, ConplanError> {
        let planning = self.read_units(&self.planning_units)?;
        let mut session = Session::new(planning, self.engine.clone());

        let focus = self
            .focus_area
            .as_deref()
            .map(|p| self.read_units(p))
            .transpose()?;
        let avoidance = self
            .avoidance_area
            .as_deref()
            .map(|p| self.read_units(p))
            .transpose()?;
        session.set_areas(focus, avoidance)?;
        Ok(session)
    }

    /// Load every input into a fresh session.
    pub fn open_session(&self, progress: &dyn Progress) -> Result<Outcome<Session>, ConplanError> {
        let mut session = self.open_areas()?;
        let mut warnings = Vec::new();
        for (source, config) in self.sources() {
            let data = read_connectivity(self.resolve(&config.matrix), config.format)?
                .collect_into(&mut warnings);
            let units = config
                .units
                .as_deref()
                .map(|p| self.read_units(p))
                .transpose()?;
            warnings.extend(session.add_source(
                SourceInput {
                    source,
                    data,
                    matrix_type: config.matrix_type,
                    units,
                },
                progress,
            )?);
        }
        Ok(Outcome::with_warnings(session, warnings))
    }

    /// Metric requests for every configured source.
    pub fn metric_requests(&self) -> Result<Vec<MetricRequest>, ConplanError> {
        let mut requests = Vec::new();
        for (source, config) in self.sources() {
            let names = match source {
                ConnectivitySource::Demographic => &self.metrics.demographic,
                ConnectivitySource::Landscape => &self.metrics.landscape,
            };
            let kinds = if names.is_empty() {
                MetricKind::ALL.to_vec()
            } else {
                names
                    .iter()
                    .map(|n| n.parse())
                    .collect::<Result<Vec<MetricKind>, _>>()?
            };
            let mut scopes = vec![UnitScope::PlanningUnit];
            if self.metrics.connectivity_units && config.units.is_some() {
                scopes.push(UnitScope::ConnectivityUnit);
            }
            for scope in scopes {
                requests.push(MetricRequest {
                    source,
                    scope,
                    kinds: kinds.clone(),
                });
            }
        }
        Ok(requests)
    }
}

// =============================================================================
// TESTS
// =============================================================================
