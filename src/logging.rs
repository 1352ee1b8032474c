//! Logging configuration and initialization for Cabinet.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{CabinetError, Result};

/// Parse a log level name, falling back to INFO for anything unknown.
fn parse_level(level: &str) -> Level {
    level.trim().parse::<Level>().unwrap_or(match level.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        _ => Level::INFO,
    })
}

/// Build the filter: `RUST_LOG` directives win, the configured level is the floor.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(parse_level(level).into())
}

/// Initialize the logging system with the given configuration.
///
/// Events go to stdout and are appended to the configured log file.
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)?;
    let writer = std::io::stdout.and(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .with(build_filter(&config.level))
        .try_init()
        .map_err(|e| CabinetError::Config(format!("logging already initialized: {e}")))
}

/// Initialize console-only logging (for development/testing).
///
/// Silently keeps an already-installed subscriber.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(true),
        )
        .with(build_filter(level))
        .try_init();
}
