//! Logging setup for drivetree.
//!
//! Structural mutations are logged at `info`, lookups at `debug`, and
//! blob store failures at `warn`. Output goes to stdout and, when a log
//! file is configured, to that file as well.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

/// Parse a level name, falling back to `INFO` for unknown values.
fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(parse_level(level).into())
}

/// Initialize logging to stdout and the configured log file.
///
/// The log file is appended to, so restarts keep earlier history.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let path = Path::new(&config.file);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = OpenOptions::new().create(true).append(true).open(path)?;
    let writer = std::io::stdout.and(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .with(build_filter(&config.level))
        .init();

    Ok(())
}

/// Initialize console-only logging.
///
/// Used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(true),
        )
        .with(build_filter(level))
        .init();
}
