// src/logging.rs

//! Logging setup for `distro-tracker` using `tracing` + `tracing-subscriber`.
//!
//! Filter selection:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DISTRO_TRACKER_LOG`, read as `EnvFilter` directives
//!    (e.g. `"debug"` or `"info,distro_tracker::mail=trace"`)
//! 3. default to `info`
//!
//! With 1 and 3 the file watcher backend is capped at `warn`.
//! Logs go to STDERR; stdout is reserved for `--dry-run` output.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "DISTRO_TRACKER_LOG";

const QUIET_DEPENDENCIES: &[&str] = &["notify=warn"];

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    let base = match (cli_level, env.map(str::trim)) {
        (Some(lvl), _) => level_name(lvl),
        (None, Some(directives)) if !directives.is_empty() => {
            return EnvFilter::try_new(directives)
                .with_context(|| format!("invalid {LOG_ENV} value {directives:?}"));
        }
        _ => "info",
    };

    let mut filter = EnvFilter::try_new(base)?;
    for directive in QUIET_DEPENDENCIES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
