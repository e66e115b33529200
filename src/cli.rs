// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cryopipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cryopipe",
    version,
    about = "Orchestrate cryo-ET preprocessing of incoming tilt series.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    ///
    /// Default: `Cryopipe.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Cryopipe.toml")]
    pub config: String,

    /// Process the current backlog of datasets, then exit once idle
    /// instead of watching for new acquisitions.
    #[arg(long)]
    pub once: bool,

    /// Parse + validate the config, print the stage plan, but don't
    /// execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print per-dataset and aggregate status from the persisted state
    /// snapshot, then exit.
    #[arg(long)]
    pub status: bool,

    /// Request cancellation of one dataset in a running orchestrator,
    /// then exit. All of the dataset's non-terminal stages become
    /// Cancelled; other datasets are unaffected.
    #[arg(long, value_name = "DATASET")]
    pub cancel: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CRYOPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
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
