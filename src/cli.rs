// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `distro-tracker`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "distro-tracker",
    version,
    about = "Process incoming Distro Tracker mail from a maildir queue.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `DistroTracker.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "DistroTracker.toml")]
    pub config: String,

    /// Process the messages already in the maildir, then exit (no watching).
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DISTRO_TRACKER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print settings and pending mail, but don't process anything.
    #[arg(long)]
    pub dry_run: bool,
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
