use crate::{Executor, Job, timer};
use std::time::Duration;

/// Runs jobs synchronously on whichever thread submits them.
///
/// Delayed jobs run on the process-wide timer thread once they are due.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn name(&self) -> &str {
        "inline"
    }

    fn execute(&self, job: Job) {
        job();
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        if let Err(err) = timer::shared().schedule(delay, job) {
            tracing::error!(error = %err, "inline timer unavailable; job dropped");
        }
    }
}
