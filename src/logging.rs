//! Explicit logging setup.
//!
//! The subscriber is installed exactly once, from a config assembled out of
//! CLI flags. Components never configure logging themselves; they only emit
//! through the `tracing` macros.

use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, Result};

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogDestination {
    Stdout,
    File(PathBuf),
}

/// Logging configuration: level, destination, structured vs plain.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is not set (e.g. "info").
    pub level: String,
    pub destination: LogDestination,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            destination: LogDestination::Stdout,
            json: false,
        }
    }
}

/// Install the global subscriber. Call once, before any component runs.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.destination {
        LogDestination::Stdout => {
            if config.json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
        }
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    AppError::Config(format!("Cannot open log file {}: {}", path.display(), e))
                })?;
            let writer = Arc::new(file);
            if config.json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            }
        }
    }

    Ok(())
}
