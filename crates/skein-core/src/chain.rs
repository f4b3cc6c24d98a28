//! Combinators deriving one task from another.
//!
//! Every combinator takes the queue its callback should run on. The usual
//! choice is [`Contexts::chain_queue`](skein_dispatch::Contexts::chain_queue)
//! for the `chain` family and
//! [`Contexts::observer_queue`](skein_dispatch::Contexts::observer_queue) for
//! `on_success` / `on_fail` / `on_cancel`.
//!
//! Derived tasks are linked to the task they currently depend on, so
//! cancelling the end of a chain is forwarded (best-effort) upstream. That
//! includes a shared upstream: cancelling one of several tasks derived from
//! the same task cancels it for all of them.

use crate::error::TaskError;
use crate::group::TaskGroup;
use crate::handle::TaskHandle;
use crate::source::Source;
use crate::status::{Failure, Status};
use crate::task::Task;
use skein_dispatch::Queue;
use std::time::Duration;

impl<T: Clone + Send + 'static> Task<T> {
    /// When this task completes, run `next` with it on `queue` and mirror the
    /// terminal status of the task `next` returns.
    ///
    /// Cancelling the returned task also cancels `self` while it is pending,
    /// and with it every other task derived from `self`. A caller that only
    /// wants to drop its own branch should ignore the branch's outcome rather
    /// than cancel it.
    pub fn chain<K, F>(&self, queue: &Queue, next: F) -> Task<K>
    where
        K: Clone + Send + 'static,
        F: FnOnce(&Task<T>) -> Task<K> + Send + 'static,
    {
        let source = Source::new();
        let derived = source.task();
        derived.link_task(self);

        let weak_derived = derived.downgrade();
        self.notify(queue, move |upstream| {
            let downstream = next(upstream);
            if let Some(derived) = weak_derived.upgrade() {
                derived.link_task(&downstream);
            }
            downstream.notify(&Queue::inline(), move |finished| {
                // Loses the race only if the derived task was cancelled.
                let _ = source.resolve(finished.status());
            });
        });
        derived
    }

    /// Continue with `next` only if this task succeeds. Cancellation and
    /// failure pass straight through without calling `next`; an error
    /// returned by `next` fails the derived task.
    pub fn chain_on_success<K, F>(&self, queue: &Queue, next: F) -> Task<K>
    where
        K: Clone + Send + 'static,
        F: FnOnce(T) -> anyhow::Result<Task<K>> + Send + 'static,
    {
        self.chain(queue, move |upstream| match upstream.status() {
            Status::Success(value) => next(value).unwrap_or_else(Task::failed),
            Status::Cancelled => Task::cancelled(),
            Status::Failed(failure) => Task::failed(failure),
            other => Task::failed(non_terminal(other.kind())),
        })
    }

    /// Continue with `next` only if this task fails; success and
    /// cancellation pass straight through.
    pub fn chain_on_fail<F>(&self, queue: &Queue, next: F) -> Task<T>
    where
        F: FnOnce(Failure) -> Task<T> + Send + 'static,
    {
        self.chain(queue, move |upstream| match upstream.status() {
            Status::Failed(failure) => next(failure),
            Status::Success(value) => Task::resolved(value),
            Status::Cancelled => Task::cancelled(),
            other => Task::failed(non_terminal(other.kind())),
        })
    }

    /// Transform a successful value; an error from `transform` fails the
    /// derived task.
    pub fn map<K, F>(&self, queue: &Queue, transform: F) -> Task<K>
    where
        K: Clone + Send + 'static,
        F: FnOnce(T) -> anyhow::Result<K> + Send + 'static,
    {
        self.chain_on_success(queue, move |value| transform(value).map(Task::resolved))
    }

    /// Observe success. Returns this task unchanged.
    pub fn on_success<F>(&self, queue: &Queue, callback: F) -> Task<T>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.notify(queue, move |task| {
            if let Some(value) = task.result() {
                callback(value);
            }
        })
    }

    /// Observe failure. Returns this task unchanged.
    pub fn on_fail<F>(&self, queue: &Queue, callback: F) -> Task<T>
    where
        F: FnOnce(Failure) + Send + 'static,
    {
        self.notify(queue, move |task| {
            if let Some(failure) = task.failure() {
                callback(failure);
            }
        })
    }

    /// Observe cancellation. Returns this task unchanged.
    pub fn on_cancel<F>(&self, queue: &Queue, callback: F) -> Task<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.notify(queue, move |task| {
            if matches!(task.status(), Status::Cancelled) {
                callback();
            }
        })
    }

    /// A task with this task's terminal status, completing no earlier than
    /// `interval` after this one does. The wait is armed on `queue`.
    pub fn delay(&self, queue: &Queue, interval: Duration) -> Task<T> {
        let source = Source::new();
        let derived = source.task();
        derived.link_task(self);

        let timer_queue = queue.clone();
        self.notify(&Queue::inline(), move |upstream| {
            let status = upstream.status();
            timer_queue.run_after(interval, move || {
                let _ = source.resolve(status);
            });
        });
        derived
    }

    /// Race this task against a timer of `interval`.
    ///
    /// If this task completes first the result mirrors it. Otherwise this
    /// task is cancelled and the result fails with `TaskError::TimedOut`.
    pub fn timeout(&self, queue: &Queue, interval: Duration) -> Task<T> {
        let timer = Task::resolved(()).delay(queue, interval);
        let group = TaskGroup::new(vec![TaskHandle::from(self), TaskHandle::from(&timer)]);

        let upstream = self.clone();
        let derived = group.when_any().chain(&Queue::inline(), move |_| {
            if upstream.cancel().is_ok() {
                Task::failed(TaskError::TimedOut(interval))
            } else {
                let _ = timer.cancel();
                upstream
            }
        });
        derived.link_task(self);
        derived
    }
}

fn non_terminal(kind: crate::status::StatusKind) -> TaskError {
    TaskError::InconsistentState(format!("chain observed non-terminal status {kind}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;
    use parking_lot::Mutex;
    use skein_dispatch::{SerialQueue, WorkerPool};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn inline() -> Queue {
        Queue::inline()
    }

    #[test]
    fn chain_mirrors_each_downstream_terminal() {
        let failure = Failure::msg("downstream");
        let cases: Vec<Status<i32>> = vec![
            Status::Success(9),
            Status::Cancelled,
            Status::Failed(failure.clone()),
        ];
        for expected in cases {
            let downstream_status = expected.clone();
            let derived = Task::resolved("x").chain(&inline(), move |_| match downstream_status {
                Status::Success(v) => Task::resolved(v),
                Status::Cancelled => Task::cancelled(),
                Status::Failed(f) => Task::failed(f),
                _ => unreachable!(),
            });
            assert_eq!(derived.status(), expected);
        }
    }

    #[test]
    fn chain_waits_for_pending_downstream() {
        let downstream: Source<u8> = Source::new();
        let next = downstream.task();
        let derived = Task::resolved(()).chain(&inline(), move |_| next);
        assert_eq!(derived.kind(), StatusKind::Executing);
        downstream.complete(4).unwrap();
        assert_eq!(derived.result(), Some(4));
    }

    #[test]
    fn chain_runs_factory_on_requested_queue() {
        let main = SerialQueue::new("main");
        let source: Source<i32> = Source::new();
        let derived = source.task().chain(&main.queue(), |t| {
            Task::resolved(t.result().unwrap_or_default() * 2)
        });
        source.complete(21).unwrap();
        assert!(!derived.is_completed());
        main.run_until_idle();
        assert_eq!(derived.result(), Some(42));
    }

    #[test]
    fn chain_on_success_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let cancelled = Task::<i32>::cancelled().chain_on_success(&inline(), move |v| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Task::resolved(v))
        });
        assert_eq!(cancelled.kind(), StatusKind::Cancelled);

        let failure = Failure::msg("upstream");
        let c = Arc::clone(&calls);
        let failed = Task::<i32>::failed(failure.clone()).chain_on_success(&inline(), move |v| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Task::resolved(v))
        });
        assert!(failed.failure().unwrap().same(&failure));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chain_on_success_error_fails_derived() {
        let derived: Task<i32> =
            Task::resolved(1).chain_on_success(&inline(), |_| anyhow::bail!("parse error"));
        assert_eq!(derived.failure().unwrap().to_string(), "parse error");
    }

    #[test]
    fn chain_on_fail_recovers_and_passes_through() {
        let recovered = Task::<i32>::failed(Failure::msg("offline"))
            .chain_on_fail(&inline(), |_| Task::resolved(0));
        assert_eq!(recovered.result(), Some(0));

        let untouched = Task::resolved(5).chain_on_fail(&inline(), |_| Task::resolved(0));
        assert_eq!(untouched.result(), Some(5));

        let cancelled = Task::<i32>::cancelled().chain_on_fail(&inline(), |_| Task::resolved(0));
        assert_eq!(cancelled.kind(), StatusKind::Cancelled);
    }

    #[test]
    fn map_transforms_and_fails() {
        let mapped = Task::resolved("12").map(&inline(), |s| Ok(s.parse::<i32>()?));
        assert_eq!(mapped.result(), Some(12));

        let broken = Task::resolved("twelve").map(&inline(), |s| Ok(s.parse::<i32>()?));
        assert_eq!(broken.kind(), StatusKind::Failed);
    }

    #[test]
    fn observers_filter_by_kind_and_return_receiver() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2, l3) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let task = Task::resolved(3);
        let returned = task
            .on_success(&inline(), move |v| l1.lock().push(format!("success {v}")))
            .on_fail(&inline(), move |_| l2.lock().push("fail".to_string()))
            .on_cancel(&inline(), move || l3.lock().push("cancel".to_string()));
        assert!(returned.same(&task));
        assert_eq!(*log.lock(), vec!["success 3".to_string()]);
    }

    #[test]
    fn cancelling_derived_reaches_upstream() {
        let upstream = Task::<i32>::from_work(|| Ok(1));
        let derived = upstream.map(&inline(), |v| Ok(v + 1));
        derived.cancel().unwrap();
        assert_eq!(upstream.kind(), StatusKind::Cancelled);
        assert_eq!(derived.kind(), StatusKind::Cancelled);
    }

    #[test]
    fn cancelling_one_sibling_cancels_the_shared_upstream() {
        let shared: Source<i32> = Source::new();
        let upstream = shared.task();
        let left = upstream.map(&inline(), |v| Ok(v + 1));
        let right = upstream.delay(&inline(), Duration::from_millis(1));

        left.cancel().unwrap();
        assert_eq!(upstream.kind(), StatusKind::Cancelled);
        assert!(matches!(
            right.wait_timeout(Duration::from_secs(5)),
            Err(TaskError::Cancelled)
        ));
        assert!(shared.complete(1).unwrap_err().is_already_completed());
    }

    #[test]
    fn timeouts_on_inline_queue_settle_with_their_task() {
        let guarded: Vec<Task<i32>> = (0..20)
            .map(|i| Task::resolved(i).timeout(&inline(), Duration::from_secs(30)))
            .collect();
        for (i, task) in (0..).zip(&guarded) {
            assert_eq!(task.wait_timeout(Duration::from_secs(5)).unwrap(), i);
        }
    }

    #[test]
    fn cancelling_derived_after_factory_reaches_downstream() {
        let downstream: Source<i32> = Source::new();
        let next = downstream.task();
        let derived = Task::resolved(()).chain(&inline(), move |_| next);
        derived.cancel().unwrap();
        assert_eq!(downstream.task().kind(), StatusKind::Cancelled);
    }

    #[test]
    fn delay_preserves_status_and_waits() {
        let pool = WorkerPool::new("delay-test", 1).unwrap();
        let start = Instant::now();
        let delayed = Task::resolved(8).delay(&pool.queue(), Duration::from_millis(30));
        assert!(!delayed.is_completed());
        assert_eq!(delayed.wait().unwrap(), 8);
        assert!(start.elapsed() >= Duration::from_millis(30));

        let cancelled = Task::<i32>::cancelled().delay(&pool.queue(), Duration::from_millis(5));
        assert!(matches!(cancelled.wait(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn timeout_fires_for_slow_task() {
        let pool = WorkerPool::new("timeout-test", 1).unwrap();
        let source: Source<i32> = Source::new();
        let guarded = source.task().timeout(&pool.queue(), Duration::from_millis(20));
        assert!(matches!(guarded.wait(), Err(TaskError::Failed(_))));
        assert_eq!(source.task().kind(), StatusKind::Cancelled);
        let failure = guarded.failure().unwrap();
        assert!(matches!(
            failure.downcast_ref::<TaskError>(),
            Some(TaskError::TimedOut(_))
        ));
    }

    #[test]
    fn timeout_mirrors_fast_task() {
        let pool = WorkerPool::new("timeout-test", 1).unwrap();
        let guarded = Task::resolved(1).timeout(&pool.queue(), Duration::from_secs(10));
        assert_eq!(guarded.wait().unwrap(), 1);
    }
}
