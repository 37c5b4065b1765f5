//! # conplan
//!
//! Library half of the `conplan` binary: the CLI definition, project
//! configuration loading and command implementations. Kept as a library so
//! integration tests can drive commands without spawning a process.

pub mod cli;
pub mod config;

pub use cli::{Cli, Commands, execute};
pub use config::ProjectConfig;
