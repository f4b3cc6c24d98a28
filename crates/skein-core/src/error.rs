//! Error types for skein-core

use crate::status::Failure;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by task state transitions and by awaiting a task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// A terminal transition was attempted on a task that already reached a
    /// terminal state. Callers racing cancellation against completion treat
    /// this as a no-op.
    #[error("task already completed")]
    AlreadyCompleted,

    /// The task state machine was bypassed.
    #[error("inconsistent task state: {0}")]
    InconsistentState(String),

    /// The awaited task ended in `Cancelled`.
    #[error("task was cancelled")]
    Cancelled,

    /// The awaited task ended in `Failed`; the payload is the task's failure.
    #[error("task failed: {0}")]
    Failed(Failure),

    #[error("task did not complete within {0:?}")]
    TimedOut(Duration),

    /// The completion source was dropped while its task was still pending.
    #[error("completion source was dropped before the task completed")]
    SourceDropped,
}

impl TaskError {
    /// Whether this is the benign "lost the race" error.
    #[must_use]
    pub fn is_already_completed(&self) -> bool {
        matches!(self, Self::AlreadyCompleted)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config value: {0}")]
    ValidationError(String),
}

/// Main error type for skein-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] skein_dispatch::DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_completed_is_recognised() {
        assert!(TaskError::AlreadyCompleted.is_already_completed());
        assert!(!TaskError::Cancelled.is_already_completed());
    }

    #[test]
    fn failed_display_includes_payload() {
        let err = TaskError::Failed(Failure::msg("disk full"));
        assert_eq!(err.to_string(), "task failed: disk full");
    }

    #[test]
    fn task_error_converts_into_crate_error() {
        let err: Error = TaskError::SourceDropped.into();
        assert!(matches!(err, Error::Task(TaskError::SourceDropped)));
        assert!(err.to_string().starts_with("Task error:"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::ValidationError("worker_threads must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid config value: worker_threads must be > 0"
        );
    }
}
