//! Task lifecycle state.
//!
//! ```text
//! New ──► Executing ──┬──► Success(value)
//!  │                  ├──► Cancelled
//!  └──────────────────┴──► Failed(failure)
//! ```
//!
//! The three right-hand states are terminal: once reached, every further
//! transition is rejected with [`TaskError::AlreadyCompleted`] and the status
//! is left untouched.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The payload of a failed task.
///
/// Domain errors are opaque to the engine; they travel as `anyhow::Error`
/// behind an `Arc` so every observer of a task sees the same failure.
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::new(err)))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether both values carry the very same failure instance.
    pub fn same(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl From<TaskError> for Failure {
    fn from(err: TaskError) -> Self {
        Self::new(err)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Field-less mirror of [`Status`], for logs and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    New,
    Executing,
    Success,
    Cancelled,
    Failed,
}

impl StatusKind {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}

/// Lifecycle state of a task. Exactly one case is active at a time.
#[derive(Debug, Clone)]
pub enum Status<T> {
    /// Created, not yet started.
    New,
    /// Work has begun.
    Executing,
    Success(T),
    Cancelled,
    Failed(Failure),
}

impl<T> Status<T> {
    /// Whether the status is terminal (success, cancelled or failed).
    pub fn is_completed(&self) -> bool {
        self.kind().is_terminal()
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            Self::New => StatusKind::New,
            Self::Executing => StatusKind::Executing,
            Self::Success(_) => StatusKind::Success,
            Self::Cancelled => StatusKind::Cancelled,
            Self::Failed(_) => StatusKind::Failed,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Convert a terminal status into the value an awaiting caller sees.
    pub fn into_result(self) -> Result<T, TaskError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Cancelled => Err(TaskError::Cancelled),
            Self::Failed(failure) => Err(TaskError::Failed(failure)),
            other => Err(TaskError::InconsistentState(format!(
                "awaited task reported non-terminal status {}",
                other.kind()
            ))),
        }
    }

    /// Apply one lifecycle transition.
    ///
    /// Leaving a terminal state fails with `AlreadyCompleted`; moving back to
    /// `New`, or from `Executing` to `Executing`, fails with
    /// `InconsistentState`. On error `self` is unchanged.
    pub(crate) fn transition(&mut self, next: Status<T>) -> Result<(), TaskError> {
        if self.is_completed() {
            return Err(TaskError::AlreadyCompleted);
        }
        match (self.kind(), next.kind()) {
            (_, StatusKind::New) | (StatusKind::Executing, StatusKind::Executing) => {
                Err(TaskError::InconsistentState(format!(
                    "illegal transition {} -> {}",
                    self.kind(),
                    next.kind()
                )))
            }
            _ => {
                *self = next;
                Ok(())
            }
        }
    }
}

impl<T: PartialEq> PartialEq for Status<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success(a), Self::Success(b)) => a == b,
            (Self::Failed(a), Self::Failed(b)) => a.same(b),
            (a, b) => a.kind() == b.kind() && !matches!(a, Self::Success(_) | Self::Failed(_)),
        }
    }
}
