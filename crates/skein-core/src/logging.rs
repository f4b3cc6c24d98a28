//! Structured logging for skein
//!
//! The engine itself only emits `trace`/`debug` events through `tracing`;
//! this module installs a subscriber for applications (and tests) that want
//! to see them.
//!
//! # Usage
//!
//! Initialize logging once at startup:
//!
//! ```ignore
//! use skein_core::logging::{init_logging, LogConfig};
//! use skein_core::config::LogFormat;
//!
//! let config = LogConfig {
//!     level: "skein_core=debug".to_string(),
//!     format: LogFormat::Pretty,
//!     file: None,
//! };
//! init_logging(&config)?;
//! ```
//!
//! # Correlation Fields
//!
//! Events use these field names consistently:
//! - `task_id`: Task identity (`task-N`)
//! - `status`: Status kind after a transition
//! - `storage`: Name of a tagged task storage
//! - `tag`: Storage tag
//! - `tracked`, `completed`, `total`: counters in storage/group events

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (`info`, `skein_core=trace`, ...)
    /// Can be overridden by RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to log file, written in addition to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn ensure_parent_dir(path: &std::path::Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| LogError::InvalidLevel(level.to_string())),
    }
}

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// One formatted output. Every output shares the same field layout so a
/// JSON log file and JSON stderr carry identical records.
fn output_layer<W>(format: LogFormat, writer: W, ansi: bool) -> OutputLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true);
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer
            .json()
            .with_timer(SystemTime)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber.
///
/// Call once at application startup; later calls return
/// `Err(LogError::AlreadyInitialized)`. `RUST_LOG` overrides the configured
/// level, e.g. `RUST_LOG=skein_core=trace`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if is_logging_initialized() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = build_filter(&config.level)?;
    let mut outputs = vec![output_layer(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        ensure_parent_dir(path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        outputs.push(output_layer(config.format, Mutex::new(file), false));
    }

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(outputs.with_filter(filter)),
    )?;
    let _ = LOGGING_INITIALIZED.set(true);

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "skein logging installed"
    );
    Ok(())
}

/// Whether [`init_logging`] has already installed a subscriber.
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
