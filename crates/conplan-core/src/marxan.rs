//! # Optimizer Integration
//!
//! File-level helpers around the external site-selection optimizer:
//! the `input.dat` directive file, executable discovery and the solution
//! files it writes. Running the optimizer is left to the caller.

use crate::formats::Table;
use crate::{ConplanError, UnitId, Warning, WarningKind};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directive enabling asymmetric connectivity.
pub const ASYMMETRIC_DIRECTIVE: &str = "ASYMMETRICCONNECTIVITY";

/// Executable names searched by [`locate_optimizer`], in preference order.
pub const OPTIMIZER_EXECUTABLES: [&str; 8] = [
    "Marxan_x64.exe",
    "Marxan.exe",
    "MarZone_x64.exe",
    "MarZone.exe",
    "Marxan_x64",
    "Marxan",
    "MarZone_x64",
    "MarZone",
];

// =============================================================================
// INPUT FILE
// =============================================================================

/// The optimizer's `input.dat`: one `KEY value` directive per line.
///
/// Unknown lines (comments, blank lines, directives the engine never
/// touches) are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDat {
    lines: Vec<String>,
}

impl InputDat {
    /// Parse directive text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Read an input file.
    pub fn read_path(path: impl AsRef<Path>) -> Result<Self, ConplanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConplanError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
        Ok(Self::parse(&text))
    }

    /// Write the file back.
    pub fn write_path(&self, path: impl AsRef<Path>) -> Result<(), ConplanError> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.split_whitespace().next() == Some(key))
    }

    /// Value of a directive (rest of the line after the key, trimmed).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let line = &self.lines[self.position(key)?];
        Some(line.trim_start()[key.len()..].trim())
    }

    /// Set a directive, replacing the first occurrence or appending.
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format!("{} {}", key, value);
        match self.position(key) {
            Some(pos) => self.lines[pos] = line,
            None => self.lines.push(line),
        }
    }

    /// Remove every occurrence of a directive. Returns whether any existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| line.split_whitespace().next() != Some(key));
        self.lines.len() != before
    }

    /// Insert `ASYMMETRICCONNECTIVITY  1` right after `NUMREPS`, or remove it.
    pub fn set_asymmetric(&mut self, enabled: bool) -> Result<(), ConplanError> {
        self.remove(ASYMMETRIC_DIRECTIVE);
        if enabled {
            let pos = self.position("NUMREPS").ok_or_else(|| {
                ConplanError::Configuration(
                    "Optimizer input file has no NUMREPS line to anchor ASYMMETRICCONNECTIVITY"
                        .to_string(),
                )
            })?;
            self.lines
                .insert(pos + 1, format!("{}  1", ASYMMETRIC_DIRECTIVE));
        }
        Ok(())
    }

    /// Whether asymmetric connectivity is enabled.
    #[must_use]
    pub fn is_asymmetric(&self) -> bool {
        self.get(ASYMMETRIC_DIRECTIVE)
            .and_then(|v| v.parse::<f64>().ok())
            .is_some_and(|v| v != 0.0)
    }

    /// `SCENNAME`.
    pub fn scenario_name(&self) -> Result<&str, ConplanError> {
        self.require("SCENNAME")
    }

    /// `NUMREPS`.
    pub fn num_reps(&self) -> Result<u32, ConplanError> {
        let raw = self.require("NUMREPS")?;
        raw.parse().map_err(|_| {
            ConplanError::Format(format!("NUMREPS '{}' is not a positive integer", raw))
        })
    }

    fn require(&self, key: &str) -> Result<&str, ConplanError> {
        self.get(key).ok_or_else(|| {
            ConplanError::Configuration(format!("Optimizer input file has no {} directive", key))
        })
    }

    /// Resolve a directory directive against the input file's directory.
    #[must_use]
    pub fn directory(&self, key: &str, base: &Path) -> Option<PathBuf> {
        self.get(key).map(|dir| base.join(dir))
    }

    /// Warnings for `INPUTDIR` / `OUTPUTDIR` that are missing or absent.
    #[must_use]
    pub fn check_directories(&self, base: &Path) -> Vec<Warning> {
        ["INPUTDIR", "OUTPUTDIR"]
            .into_iter()
            .filter_map(|key| match self.directory(key, base) {
                Some(dir) if dir.is_dir() => None,
                Some(dir) => Some(Warning::new(
                    WarningKind::Configuration,
                    format!("{} '{}' does not exist", key, dir.display()),
                )),
                None => Some(Warning::new(
                    WarningKind::Configuration,
                    format!("Optimizer input file has no {} directive", key),
                )),
            })
            .collect()
    }
}

impl fmt::Display for InputDat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

// =============================================================================
// EXECUTABLE
// =============================================================================

/// Find the optimizer executable in `dir`.
pub fn locate_optimizer(dir: &Path) -> Result<PathBuf, ConplanError> {
    OPTIMIZER_EXECUTABLES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ConplanError::ExternalTool(format!(
                "No optimizer executable ({}) found in '{}'",
                OPTIMIZER_EXECUTABLES[..4].join(", "),
                dir.display()
            ))
        })
}

// =============================================================================
// SOLUTIONS
// =============================================================================

/// Which optimizer output to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSelection {
    /// `<SCENNAME>_best.txt`.
    Best,
    /// Aggregated replicate selections.
    Frequency,
    /// One replicate, 1-based.
    Replicate(u32),
}

impl OutputSelection {
    /// Display label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Best => "Best Solution".to_string(),
            Self::Frequency => "Selection Frequency".to_string(),
            Self::Replicate(n) => format!("r{:05}", n),
        }
    }
}

impl FromStr for OutputSelection {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "best" | "best solution" => Ok(Self::Best),
            "frequency" | "selection frequency" => Ok(Self::Frequency),
            other => other
                .strip_prefix('r')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(Self::Replicate)
                .ok_or_else(|| {
                    ConplanError::Configuration(format!(
                        "Unknown output '{}'. Use: best, frequency, r00001 ...",
                        s
                    ))
                }),
        }
    }
}

/// Path of replicate `n` (1-based): `<dir>/<scen>_r00001.txt`.
#[must_use]
pub fn replicate_path(output_dir: &Path, scenario: &str, n: u32) -> PathBuf {
    output_dir.join(format!("{}_r{:05}.txt", scenario, n))
}

/// Path of the best solution: `<dir>/<scen>_best.txt`.
#[must_use]
pub fn best_solution_path(output_dir: &Path, scenario: &str) -> PathBuf {
    output_dir.join(format!("{}_best.txt", scenario))
}

/// Read a two-column solution file (unit id, value). Header names vary
/// between optimizer versions, so columns are taken by position.
pub fn read_solution(path: &Path) -> Result<BTreeMap<UnitId, f64>, ConplanError> {
    let table = Table::read_path(path)?;
    if table.headers.len() < 2 {
        return Err(ConplanError::Format(format!(
            "Solution file '{}' needs two columns, found: {}",
            path.display(),
            table.headers.join(", ")
        )));
    }
    let ids = table.unit_ids(0)?;
    let values = table.numbers(1)?;
    Ok(ids.into_iter().zip(values).collect())
}

/// Number of replicates selecting each unit.
pub fn selection_frequency(
    output_dir: &Path,
    scenario: &str,
    num_reps: u32,
) -> Result<BTreeMap<UnitId, f64>, ConplanError> {
    let mut frequency: BTreeMap<UnitId, f64> = BTreeMap::new();
    for n in 1..=num_reps {
        for (id, value) in read_solution(&replicate_path(output_dir, scenario, n))? {
            *frequency.entry(id).or_insert(0.0) += value;
        }
    }
    tracing::info!(scenario, replicates = num_reps, units = frequency.len(), "selection frequency");
    Ok(frequency)
}

/// Load the values of one optimizer output described by `input`.
///
/// `base` is the directory of the input file; relative `OUTPUTDIR` values
/// are resolved against it.
pub fn load_output(
    input: &InputDat,
    base: &Path,
    which: OutputSelection,
) -> Result<BTreeMap<UnitId, f64>, ConplanError> {
    let scenario = input.scenario_name()?;
    let output_dir = input
        .directory("OUTPUTDIR", base)
        .unwrap_or_else(|| base.to_path_buf());
    match which {
        OutputSelection::Best => read_solution(&best_solution_path(&output_dir, scenario)),
        OutputSelection::Frequency => {
            selection_frequency(&output_dir, scenario, input.num_reps()?)
        }
        OutputSelection::Replicate(n) => read_solution(&replicate_path(&output_dir, scenario, n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "Input file\nBLM 1\nNUMREPS 3\nSCENNAME connect\nINPUTDIR input\nOUTPUTDIR output\n";

    #[test]
    fn asymmetric_line_follows_numreps() {
        let mut input = InputDat::parse(INPUT);
        input.set_asymmetric(true).expect("set");
        let text = input.to_string();
        assert!(text.contains("NUMREPS 3\nASYMMETRICCONNECTIVITY  1\nSCENNAME"));
        assert!(input.is_asymmetric());

        input.set_asymmetric(true).expect("idempotent");
        assert_eq!(input.to_string().matches(ASYMMETRIC_DIRECTIVE).count(), 1);

        input.set_asymmetric(false).expect("unset");
        assert_eq!(input.to_string(), INPUT);
    }

    #[test]
    fn directives_are_read_and_rewritten() {
        let mut input = InputDat::parse(INPUT);
        assert_eq!(input.scenario_name().expect("scen"), "connect");
        assert_eq!(input.num_reps().expect("reps"), 3);
        input.set("BLM", "0.5");
        assert_eq!(input.get("BLM"), Some("0.5"));
        assert_eq!(input.to_string().lines().next(), Some("Input file"));
    }

    #[test]
    fn missing_numreps_is_a_configuration_error() {
        let mut input = InputDat::parse("SCENNAME x\n");
        assert!(matches!(
            input.set_asymmetric(true),
            Err(ConplanError::Configuration(_))
        ));
    }

    #[test]
    fn output_selection_labels() {
        assert_eq!(OutputSelection::Replicate(7).label(), "r00007");
        assert_eq!("r00007".parse::<OutputSelection>().expect("r"), OutputSelection::Replicate(7));
        assert_eq!("Best Solution".parse::<OutputSelection>().expect("best"), OutputSelection::Best);
        assert!("r0".parse::<OutputSelection>().is_err());
    }

    #[test]
    fn frequency_sums_replicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(replicate_path(dir.path(), "s", 1), "planning_unit,solution\n1,1\n2,0\n")
            .expect("r1");
        std::fs::write(replicate_path(dir.path(), "s", 2), "planning_unit\tsolution\n1\t1\n2\t1\n")
            .expect("r2");
        let freq = selection_frequency(dir.path(), "s", 2).expect("frequency");
        assert_eq!(freq[&UnitId(1)], 2.0);
        assert_eq!(freq[&UnitId(2)], 1.0);
    }

    #[test]
    fn missing_optimizer_is_an_external_tool_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            locate_optimizer(dir.path()),
            Err(ConplanError::ExternalTool(_))
        ));
        std::fs::write(dir.path().join("Marxan.exe"), b"").expect("exe");
        assert_eq!(
            locate_optimizer(dir.path()).expect("found"),
            dir.path().join("Marxan.exe")
        );
    }
}
