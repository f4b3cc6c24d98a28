use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every sender for the queue was dropped.
    #[error("queue disconnected while waiting for jobs")]
    Disconnected,

    #[error("timed out after {0:?} waiting for the queue")]
    Timeout(Duration),

    #[error("failed to spawn driver thread: {0}")]
    Spawn(#[from] std::io::Error),
}
