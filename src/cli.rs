// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::parse_duration;

/// Command-line arguments for `dagkernel`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagkernel",
    version,
    about = "Run a DAG of shell tasks on local workers or batch schedulers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "dagkernel.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGKERNEL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task graph, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// How long to wait for running tasks on shutdown (e.g. "30s", "5m").
    ///
    /// Overrides `[kernel].shutdown_timeout`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub shutdown_timeout: Option<Duration>,

    /// Abort the whole run as soon as one task fails for good.
    ///
    /// Same as `[kernel].fail_fast = true`.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
