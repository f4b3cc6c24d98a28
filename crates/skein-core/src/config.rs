//! Configuration management for skein
//!
//! Loads `skein.toml`-style files and turns the `[dispatch]` section into the
//! application's default execution contexts.
//!
//! ```toml
//! [dispatch]
//! worker_threads = 4
//! worker_thread_name = "skein-worker"
//! main_queue_name = "main"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use skein_dispatch::{Contexts, SerialQueue, WorkerPool};
use std::fmt;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Execution context settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Execution context configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Threads in the background worker pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name given to worker threads
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,

    /// Name of the main (UI) serial queue
    #[serde(default = "default_main_queue_name")]
    pub main_queue_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            worker_thread_name: default_worker_thread_name(),
            main_queue_name: default_main_queue_name(),
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

fn default_worker_thread_name() -> String {
    "skein-worker".to_string()
}

fn default_main_queue_name() -> String {
    "main".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let dispatch = &self.dispatch;
        if dispatch.worker_threads == 0 {
            return Err(ConfigError::ValidationError("worker_threads must be > 0".to_string()).into());
        }
        if dispatch.worker_thread_name.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("worker_thread_name must not be empty".to_string())
                    .into(),
            );
        }
        if dispatch.main_queue_name.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("main_queue_name must not be empty".to_string())
                    .into(),
            );
        }
        if self.logging.level.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("logging.level must not be empty".to_string()).into(),
            );
        }
        Ok(())
    }
}

/// Create the default execution contexts described by `config`.
///
/// The main context is a [`SerialQueue`] the caller must drive (returned
/// alongside the bundle); the background context is a [`WorkerPool`].
pub fn build_contexts(config: &DispatchConfig) -> crate::Result<(Contexts, SerialQueue)> {
    let main = SerialQueue::new(config.main_queue_name.clone());
    let pool = WorkerPool::new(config.worker_thread_name.clone(), config.worker_threads)?;
    tracing::debug!(
        main = %config.main_queue_name,
        workers = pool.threads(),
        "execution contexts created"
    );
    Ok((Contexts::new(main.queue(), pool.queue()), main))
}
