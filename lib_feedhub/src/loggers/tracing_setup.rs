//! # Tracing Setup
//!
//! Installs the process-wide subscriber: a colored console layer plus a JSON
//! layer written to a daily-rolling file through a non-blocking writer.
//! `RUST_LOG` takes precedence over the configured level.

use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Prefix of the rolled log files.
pub const LOG_FILE_PREFIX: &str = "feedhub.log";

/// Failures while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("cannot create log directory: {0}")]
    Io(#[from] std::io::Error),
    /// The level is not a valid filter directive.
    #[error("invalid log level: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    Init(#[from] TryInitError),
}

/// Installs console and file logging. Keep the returned guard alive for
/// the life of the process; dropping it flushes and stops the file writer.
pub fn setup_logging(log_dir: &Path, level: &str) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(level, log_dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}

