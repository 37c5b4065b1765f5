//! # conplan CLI Module
//!
//! ## Available Commands
//!
//! - `rescale` - Rescale a connectivity-unit matrix to planning units
//! - `metrics` - Compute connectivity metrics into a metrics CSV
//! - `discretize` - Add a binary (optionally lock-rule) metric to a metrics CSV
//! - `preeval` - Summarize a metric before optimization
//! - `export` - Write spec, amount, boundary and pu.dat files
//! - `input-dat` - Toggle asymmetric connectivity in the optimizer input file
//! - `frequency` - Aggregate replicate solutions into selection frequency
//! - `posthoc` - Evaluate a solution against planning-unit connectivity
//! - `check-optimizer` - Locate the optimizer executable

mod commands;

use clap::{Parser, Subcommand};
use conplan_core::ConplanError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// conplan - connectivity metrics for conservation planning
///
/// Turns connectivity matrices and unit geometries into metrics, features,
/// boundary and status files for a reserve-selection optimizer.
#[derive(Parser, Debug)]
#[command(name = "conplan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the project file
    #[arg(short = 'P', long, global = true, default_value = crate::config::DEFAULT_PROJECT_FILE)]
    pub project: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rescale connectivity from connectivity units to planning units
    Rescale {
        /// Connectivity file on connectivity units
        #[arg(short, long)]
        matrix: PathBuf,

        /// Connectivity format (matrix, edge_list, edge_list_with_type, edge_list_with_time)
        #[arg(short, long, default_value = "matrix")]
        format: String,

        /// Connectivity-unit geometry document
        #[arg(short, long)]
        units: PathBuf,

        /// Planning-unit geometry document
        #[arg(short, long)]
        planning_units: PathBuf,

        /// Edge rule (split, include, exclude, majority)
        #[arg(short, long, default_value = "split")]
        edge_rule: String,

        /// Output file, written in the input format
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the across-time mean as a square matrix (temporal data)
        #[arg(long)]
        mean_output: Option<PathBuf>,
    },

    /// Compute the metrics selected in the project file
    Metrics {
        /// Output metrics CSV
        #[arg(short, long, default_value = "metrics.csv")]
        output: PathBuf,

        /// Scope written to the CSV (pu, cu)
        #[arg(short, long, default_value = "pu")]
        scope: String,
    },

    /// Threshold a metric into a binary metric
    Discretize {
        /// Metrics CSV to read and extend
        #[arg(short, long)]
        metrics: PathBuf,

        /// Name of the metric to threshold
        #[arg(long)]
        metric: String,

        /// Lower bound (min, lq, median, uq, max, p<rank>, v:<value>)
        #[arg(long)]
        from: String,

        /// Upper bound (min, lq, median, uq, max, p<rank>, v:<value>)
        #[arg(long)]
        to: String,

        /// Turn the result into a status rule (lock_in, lock_out)
        #[arg(short, long)]
        lock: Option<String>,

        /// Scope of the metrics CSV (pu, cu)
        #[arg(short, long, default_value = "pu")]
        scope: String,

        /// Output CSV (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize a planning-unit metric and its share in the focus and
    /// avoidance areas
    Preeval {
        /// Planning-unit metrics CSV
        #[arg(short, long)]
        metrics: PathBuf,

        /// Name of the metric to summarize
        #[arg(long)]
        metric: String,
    },

    /// Write optimizer spec, amount, boundary and pu.dat files
    Export {
        /// Planning-unit metrics CSV (computed from the project when absent)
        #[arg(short, long)]
        metrics: Option<PathBuf>,
    },

    /// Set or clear asymmetric connectivity in an optimizer input file
    InputDat {
        /// Optimizer input file
        #[arg(short, long)]
        file: PathBuf,

        /// Clear the directive instead of setting it
        #[arg(long)]
        symmetric: bool,
    },

    /// Aggregate replicate solutions into selection frequency
    Frequency {
        /// Optimizer input file
        #[arg(short, long)]
        input_dat: PathBuf,

        /// Output CSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Evaluate how much connectivity a solution retains
    Posthoc {
        /// Connectivity file on planning units
        #[arg(short, long)]
        matrix: PathBuf,

        /// Connectivity format
        #[arg(short, long, default_value = "matrix")]
        format: String,

        /// Optimizer input file
        #[arg(short, long)]
        input_dat: PathBuf,

        /// Solution to evaluate (best, frequency, r00001 ...)
        #[arg(short, long, default_value = "best")]
        selection: String,

        /// Output CSV (printed when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Locate the optimizer executable
    CheckOptimizer {
        /// Directory expected to hold the executable
        #[arg(short, long)]
        dir: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ConplanError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Rescale {
            matrix,
            format,
            units,
            planning_units,
            edge_rule,
            output,
            mean_output,
        }) => cmd_rescale(
            json_mode,
            &matrix,
            &format,
            &units,
            &planning_units,
            &edge_rule,
            &output,
            mean_output.as_deref(),
        ),
        Some(Commands::Metrics { output, scope }) => {
            cmd_metrics(&cli.project, json_mode, &output, &scope)
        }
        Some(Commands::Discretize {
            metrics,
            metric,
            from,
            to,
            lock,
            scope,
            output,
        }) => cmd_discretize(
            json_mode,
            &metrics,
            &metric,
            &from,
            &to,
            lock.as_deref(),
            &scope,
            output.as_deref(),
        ),
        Some(Commands::Preeval { metrics, metric }) => {
            cmd_preeval(&cli.project, json_mode, &metrics, &metric)
        }
        Some(Commands::Export { metrics }) => {
            cmd_export(&cli.project, json_mode, metrics.as_deref())
        }
        Some(Commands::InputDat { file, symmetric }) => cmd_input_dat(json_mode, &file, !symmetric),
        Some(Commands::Frequency { input_dat, output }) => {
            cmd_frequency(json_mode, &input_dat, &output)
        }
        Some(Commands::Posthoc {
            matrix,
            format,
            input_dat,
            selection,
            output,
        }) => cmd_posthoc(
            json_mode,
            &matrix,
            &format,
            &input_dat,
            &selection,
            output.as_deref(),
        ),
        Some(Commands::CheckOptimizer { dir }) => cmd_check_optimizer(json_mode, &dir),
        None => {
            // No subcommand - show the project summary by default
            cmd_summary(&cli.project, json_mode)
        }
    }
}
