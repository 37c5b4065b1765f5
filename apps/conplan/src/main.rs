//! # conplan
//!
//! Connectivity metrics for conservation planning, from the command line.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 apps/conplan (THE BINARY)            │
//! │                                                      │
//! │   ┌─────────────┐          ┌──────────────────┐      │
//! │   │    CLI      │          │  conplan.toml    │      │
//! │   │   (clap)    │          │  (toml + serde)  │      │
//! │   └──────┬──────┘          └────────┬─────────┘      │
//! │          └──────────────┬───────────┘                │
//! │                         ▼                            │
//! │                 ┌───────────────┐                    │
//! │                 │ conplan-core  │                    │
//! │                 │ (THE ENGINE)  │                    │
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! conplan rescale -m cu_matrix.csv -u cu.json -p pu.json -o pu_matrix.csv
//! conplan --project conplan.toml metrics -o metrics.csv
//! conplan discretize -m metrics.csv --metric google_demo_pu --from lq --to max
//! conplan --project conplan.toml export --metrics metrics.csv
//! conplan posthoc -m pu_matrix.csv -i marxan/input.dat -s best
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // CONPLAN_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CONPLAN_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let cli = conplan::Cli::parse();

    let default_filter = if cli.verbose {
        "conplan=debug,conplan_core=debug"
    } else if cli.quiet {
        "conplan=warn,conplan_core=warn"
    } else {
        "conplan=info,conplan_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = conplan::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
