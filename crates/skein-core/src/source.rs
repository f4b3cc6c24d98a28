//! Completion sources: the write side of a task.
//!
//! Producers keep the [`Source`]; consumers only ever see its [`Task`].
//! Exactly one of `complete` / `fail` / `cancel` / `resolve` succeeds; the
//! rest report `AlreadyCompleted`.

use crate::error::TaskError;
use crate::status::{Failure, Status};
use crate::task::Task;

pub struct Source<T: Clone + Send + 'static> {
    task: Task<T>,
}

impl<T: Clone + Send + 'static> Default for Source<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Source<T> {
    /// Create a source and its task, which starts out `Executing`.
    pub fn new() -> Self {
        Self {
            task: Task::executing(),
        }
    }

    /// The task this source resolves.
    pub fn task(&self) -> Task<T> {
        self.task.clone()
    }

    pub fn complete(&self, value: T) -> Result<(), TaskError> {
        self.task.finish(Status::Success(value))
    }

    pub fn fail(&self, failure: impl Into<Failure>) -> Result<(), TaskError> {
        self.task.finish(Status::Failed(failure.into()))
    }

    /// Cancel the task. Unlike [`Task::cancel`] this does not reach the
    /// task's linked upstream: the producer is the upstream.
    pub fn cancel(&self) -> Result<(), TaskError> {
        self.task.finish(Status::Cancelled)
    }

    /// Forward an arbitrary terminal status. Non-terminal statuses are
    /// rejected with `InconsistentState`.
    pub fn resolve(&self, status: Status<T>) -> Result<(), TaskError> {
        self.task.finish(status)
    }
}

impl<T: Clone + Send + 'static> Drop for Source<T> {
    fn drop(&mut self) {
        if self
            .task
            .finish(Status::Failed(Failure::from(TaskError::SourceDropped)))
            .is_ok()
        {
            tracing::debug!(task_id = %self.task.id(), "source dropped before completion");
        }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("task", &self.task).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;
    use skein_dispatch::Queue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn source_task_starts_executing() {
        let source: Source<i32> = Source::new();
        assert_eq!(source.task().kind(), StatusKind::Executing);
    }

    #[test]
    fn complete_then_fail_is_rejected() {
        let source = Source::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        source.task().notify(&Queue::inline(), move |task| {
            assert_eq!(task.status(), Status::Success(42));
            h.fetch_add(1, Ordering::SeqCst);
        });

        source.complete(42).unwrap();
        assert_eq!(source.task().status(), Status::Success(42));

        let err = source.fail(Failure::msg("late")).unwrap_err();
        assert!(err.is_already_completed());
        assert!(source.cancel().unwrap_err().is_already_completed());
        assert_eq!(source.task().status(), Status::Success(42));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fail_carries_the_payload() {
        let source: Source<()> = Source::new();
        let failure = Failure::msg("unauthorized");
        source.fail(failure.clone()).unwrap();
        assert!(source.task().failure().unwrap().same(&failure));
    }

    #[test]
    fn resolve_rejects_non_terminal_status() {
        let source: Source<u8> = Source::new();
        assert!(matches!(
            source.resolve(Status::Executing),
            Err(TaskError::InconsistentState(_))
        ));
        assert_eq!(source.task().kind(), StatusKind::Executing);
    }

    #[test]
    fn source_cancel_does_not_reach_linked_upstream() {
        let upstream = Task::<()>::from_work(|| Ok(()));
        let source: Source<()> = Source::new();
        source.task().link_task(&upstream);
        source.cancel().unwrap();
        assert_eq!(upstream.kind(), StatusKind::New);
    }

    #[test]
    fn dropping_a_pending_source_fails_the_task() {
        let source: Source<i32> = Source::new();
        let task = source.task();
        drop(source);
        let failure = task.failure().unwrap();
        assert!(matches!(
            failure.downcast_ref::<TaskError>(),
            Some(TaskError::SourceDropped)
        ));
    }

    #[test]
    fn dropping_a_completed_source_is_silent() {
        let source = Source::new();
        let task = source.task();
        source.complete("ok").unwrap();
        drop(source);
        assert_eq!(task.result(), Some("ok"));
    }
}
