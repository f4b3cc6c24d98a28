//! The single-assignment, cancellable task.
//!
//! A [`Task`] is a shared handle: cloning it yields another handle to the
//! same underlying state, and the state lives until the last handle (or the
//! last registered callback holding one) is gone.
//!
//! Status transitions are linearised by a per-task mutex. Exactly one
//! terminal transition ever succeeds; every registered callback fires exactly
//! once after it, on the queue it asked for. Callbacks never run while the
//! lock is held.

use crate::error::TaskError;
use crate::status::{Failure, Status, StatusKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skein_dispatch::Queue;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tracing::{debug, trace};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Anything whose in-flight work can be asked to stop.
///
/// Tasks implement this, and so can upstream resources such as a request
/// handle; see [`Task::link`].
pub trait Cancellable: Send + Sync {
    fn cancel(&self) -> Result<(), TaskError>;
}

type Work<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;
type Callback<T> = Box<dyn FnOnce(&Task<T>) + Send>;
/// Weak back-reference to the linked upstream, captured as a closure.
/// `None` means the upstream is already gone.
type LinkedCancel = Box<dyn FnOnce() -> Option<Result<(), TaskError>> + Send>;

struct Observer<T> {
    queue: Queue,
    callback: Callback<T>,
}

struct State<T> {
    status: Status<T>,
    work: Option<Work<T>>,
    started: bool,
    observers: Vec<Observer<T>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    id: TaskId,
    state: Mutex<State<T>>,
    linked: Mutex<Option<LinkedCancel>>,
}

pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A handle that does not keep the task alive.
pub(crate) struct WeakTask<T>(Weak<Inner<T>>);

impl<T> WeakTask<T> {
    pub(crate) fn upgrade(&self) -> Option<Task<T>> {
        self.0.upgrade().map(|inner| Task { inner })
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    fn with_state(status: Status<T>, work: Option<Work<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                state: Mutex::new(State {
                    status,
                    work,
                    started: false,
                    observers: Vec::new(),
                    wakers: Vec::new(),
                }),
                linked: Mutex::new(None),
            }),
        }
    }

    /// An already successful task.
    pub fn resolved(value: T) -> Self {
        Self::with_state(Status::Success(value), None)
    }

    /// An already failed task.
    pub fn failed(failure: impl Into<Failure>) -> Self {
        Self::with_state(Status::Failed(failure.into()), None)
    }

    /// An already cancelled task.
    pub fn cancelled() -> Self {
        Self::with_state(Status::Cancelled, None)
    }

    /// A task that is pending in `Executing`; only its source may finish it.
    pub(crate) fn executing() -> Self {
        Self::with_state(Status::Executing, None)
    }

    /// A task wrapping deferred work. It stays `New` until scheduled with
    /// [`Task::schedule`] (or run in place with [`Task::run`]).
    pub fn from_work<F>(work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::with_state(Status::New, Some(Box::new(work)))
    }

    /// `from_work` followed by `schedule`.
    pub fn spawn<F>(queue: &Queue, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::from_work(work).schedule(queue)
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> Status<T> {
        self.inner.state.lock().status.clone()
    }

    pub fn kind(&self) -> StatusKind {
        self.inner.state.lock().status.kind()
    }

    /// The value, present only in `Success`.
    pub fn result(&self) -> Option<T> {
        self.inner.state.lock().status.value().cloned()
    }

    /// The failure, present only in `Failed`.
    pub fn failure(&self) -> Option<Failure> {
        self.inner.state.lock().status.failure().cloned()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().status.is_completed()
    }

    /// Whether this task's deferred work was ever started.
    ///
    /// Distinguishes a task cancelled before its work ran (`false`) from one
    /// whose work ran but whose result was discarded (`true`).
    pub fn work_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Whether both handles refer to the same task.
    pub fn same(&self, other: &Task<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakTask<T> {
        WeakTask(Arc::downgrade(&self.inner))
    }

    /// Post this task's work onto `queue`. Returns the same task.
    pub fn schedule(&self, queue: &Queue) -> Task<T> {
        let task = self.clone();
        queue.run(move || task.run());
        self.clone()
    }

    /// Execute the deferred work on the current thread.
    ///
    /// `New -> Executing -> terminal`. An error returned by the work becomes
    /// `Failed`, as does a panic. If the task reached a terminal state before
    /// this call (typically a cancellation) the work is dropped unexecuted;
    /// if it is cancelled while the work runs, the work's outcome is
    /// discarded. Running a task without work is a no-op.
    pub fn run(&self) {
        let work = {
            let mut state = self.inner.state.lock();
            if state.status.is_completed() {
                state.work = None;
                return;
            }
            let Some(work) = state.work.take() else {
                return;
            };
            if state.status.transition(Status::Executing).is_err() {
                return;
            }
            state.started = true;
            work
        };
        trace!(task_id = %self.inner.id, "task executing");

        let status = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => Status::Success(value),
            Ok(Err(err)) => Status::Failed(Failure::from(err)),
            Err(panic) => Status::Failed(Failure::msg(format!(
                "task work panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        if self.finish(status).is_err() {
            trace!(task_id = %self.inner.id, "task already terminal; work outcome discarded");
        }
    }

    /// Apply a terminal transition and fire everything waiting on it.
    pub(crate) fn finish(&self, status: Status<T>) -> Result<(), TaskError> {
        if !status.is_completed() {
            return Err(TaskError::InconsistentState(format!(
                "{} is not a terminal status",
                status.kind()
            )));
        }
        let kind = status.kind();
        let (observers, wakers) = {
            let mut state = self.inner.state.lock();
            state.status.transition(status)?;
            state.work = None;
            (
                std::mem::take(&mut state.observers),
                std::mem::take(&mut state.wakers),
            )
        };
        trace!(task_id = %self.inner.id, status = %kind, observers = observers.len(), "task completed");

        for observer in observers {
            let task = self.clone();
            let callback = observer.callback;
            observer.queue.run(move || callback(&task));
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Register `callback` to run on `queue` once the task is terminal.
    ///
    /// Fires exactly once per registration. If the task is already terminal
    /// the callback is submitted to `queue` straight away. Returns the same
    /// task so registrations can be chained.
    pub fn notify<F>(&self, queue: &Queue, callback: F) -> Task<T>
    where
        F: FnOnce(&Task<T>) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !state.status.is_completed() {
                state.observers.push(Observer {
                    queue: queue.clone(),
                    callback: Box::new(callback),
                });
                return self.clone();
            }
        }
        let task = self.clone();
        queue.run(move || callback(&task));
        self.clone()
    }

    /// Request cancellation.
    ///
    /// Moves the task to `Cancelled` (or fails with `AlreadyCompleted`),
    /// fires pending notifications, then forwards the cancellation once to
    /// the linked upstream, if any. A failure to cancel the upstream is
    /// swallowed.
    pub fn cancel(&self) -> Result<(), TaskError> {
        self.finish(Status::Cancelled)?;
        debug!(task_id = %self.inner.id, "task cancelled");

        let linked = self.inner.linked.lock().take();
        if let Some(cancel_upstream) = linked {
            match cancel_upstream() {
                Some(Ok(())) => trace!(task_id = %self.inner.id, "linked upstream cancelled"),
                Some(Err(err)) => {
                    trace!(task_id = %self.inner.id, error = %err, "linked upstream not cancelled");
                }
                None => trace!(task_id = %self.inner.id, "linked upstream already released"),
            }
        }
        Ok(())
    }

    /// Link an upstream resource whose cancellation should follow this
    /// task's. Only a weak reference is kept. Replaces any previous link.
    ///
    /// If this task is already cancelled, the upstream is cancelled at once.
    pub fn link<C>(&self, upstream: &Arc<C>)
    where
        C: Cancellable + ?Sized + 'static,
    {
        let weak = Arc::downgrade(upstream);
        self.install_link(Box::new(move || weak.upgrade().map(|c| c.cancel())));
    }

    /// [`Task::link`] for an upstream task.
    pub fn link_task<K: Clone + Send + 'static>(&self, upstream: &Task<K>) {
        let weak = upstream.downgrade();
        self.install_link(Box::new(move || weak.upgrade().map(|t| t.cancel())));
    }

    fn install_link(&self, cancel_upstream: LinkedCancel) {
        {
            // Holding the state lock keeps a concurrent `cancel` from
            // slipping between the check and the store.
            let state = self.inner.state.lock();
            if !matches!(state.status, Status::Cancelled) {
                *self.inner.linked.lock() = Some(cancel_upstream);
                return;
            }
        }
        let _ = cancel_upstream();
    }

    /// Block the calling thread until the task is terminal.
    ///
    /// Must not be called from the context that is expected to complete the
    /// task (for example the main queue's own driving thread), or it will
    /// deadlock.
    pub fn wait(&self) -> Result<T, TaskError> {
        let (tx, rx) = flume::bounded(1);
        self.notify(&Queue::inline(), move |task| {
            tx.send(task.status()).ok();
        });
        match rx.recv() {
            Ok(status) => status.into_result(),
            Err(_) => Err(TaskError::InconsistentState(
                "task released its observers without completing".to_string(),
            )),
        }
    }

    /// [`Task::wait`] with an upper bound; `TimedOut` if it expires.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let (tx, rx) = flume::bounded(1);
        self.notify(&Queue::inline(), move |task| {
            tx.send(task.status()).ok();
        });
        match rx.recv_timeout(timeout) {
            Ok(status) => status.into_result(),
            Err(flume::RecvTimeoutError::Timeout) => Err(TaskError::TimedOut(timeout)),
            Err(flume::RecvTimeoutError::Disconnected) => Err(TaskError::InconsistentState(
                "task released its observers without completing".to_string(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Clone + Send + 'static> Cancellable for Task<T> {
    fn cancel(&self) -> Result<(), TaskError> {
        Task::cancel(self)
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        if state.status.is_completed() {
            return Poll::Ready(state.status.clone().into_result());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.inner.state.lock().status.kind();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("status", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_dispatch::{SerialQueue, WorkerPool, block_on};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&c), c)
    }

    #[test]
    fn resolved_constructors_are_terminal() {
        assert_eq!(Task::resolved(3).status(), Status::Success(3));
        assert_eq!(Task::<i32>::cancelled().kind(), StatusKind::Cancelled);
        let failure = Failure::msg("bad");
        let task = Task::<i32>::failed(failure.clone());
        assert!(task.failure().unwrap().same(&failure));
        assert!(task.result().is_none());
    }

    #[test]
    fn ids_are_unique() {
        let a = Task::resolved(1);
        let b = Task::resolved(1);
        assert_ne!(a.id(), b.id());
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn from_work_stays_new_until_run() {
        let task = Task::from_work(|| Ok(7));
        assert_eq!(task.kind(), StatusKind::New);
        assert!(!task.work_started());
        task.run();
        assert_eq!(task.status(), Status::Success(7));
        assert!(task.work_started());
    }

    #[test]
    fn work_error_becomes_failed() {
        let task: Task<i32> = Task::from_work(|| anyhow::bail!("no network"));
        task.run();
        assert_eq!(task.failure().unwrap().to_string(), "no network");
    }

    #[test]
    fn work_panic_becomes_failed() {
        let task: Task<i32> = Task::from_work(|| panic!("kaboom"));
        task.run();
        let failure = task.failure().unwrap();
        assert!(failure.to_string().contains("kaboom"));
    }

    #[test]
    fn scheduled_work_runs_on_queue_in_order() {
        let main = SerialQueue::new("main");
        let task = Task::from_work(|| Ok("done".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        task.notify(&main.queue(), move |t| s.lock().push(t.kind()));
        task.schedule(&main.queue());
        assert_eq!(task.kind(), StatusKind::New);

        main.run_until_idle();
        assert_eq!(task.result().as_deref(), Some("done"));
        assert_eq!(*seen.lock(), vec![StatusKind::Success]);
    }

    #[test]
    fn notify_fires_once_per_registration() {
        let (hits, h) = counter();
        let task = Task::from_work(|| Ok(1));
        let h2 = Arc::clone(&h);
        task.notify(&Queue::inline(), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .notify(&Queue::inline(), move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        task.run();
        task.run();
        assert!(task.cancel().is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notify_after_terminal_fires_immediately() {
        let (hits, h) = counter();
        Task::resolved(5).notify(&Queue::inline(), move |t| {
            assert_eq!(t.result(), Some(5));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_on_one_queue_keep_registration_order() {
        let main = SerialQueue::new("main");
        let order = Arc::new(Mutex::new(Vec::new()));
        let task = Task::from_work(|| Ok(()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            task.notify(&main.queue(), move |_| order.lock().push(i));
        }
        task.run();
        main.run_until_idle();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_before_run_drops_the_work() {
        let (ran, r) = counter();
        let task = Task::from_work(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        task.cancel().unwrap();
        task.run();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(task.kind(), StatusKind::Cancelled);
        assert!(!task.work_started());
    }

    #[test]
    fn cancel_during_work_discards_result() {
        let slot: Arc<Mutex<Option<Task<i32>>>> = Arc::new(Mutex::new(None));
        let s = Arc::clone(&slot);
        let task = Task::from_work(move || {
            if let Some(me) = s.lock().as_ref() {
                me.cancel().unwrap();
            }
            Ok(10)
        });
        *slot.lock() = Some(task.clone());
        task.run();
        assert_eq!(task.kind(), StatusKind::Cancelled);
        assert!(task.work_started());
        slot.lock().take();
    }

    #[test]
    fn cancel_twice_reports_already_completed() {
        let task = Task::<()>::from_work(|| Ok(()));
        task.cancel().unwrap();
        assert!(task.cancel().unwrap_err().is_already_completed());
    }

    struct Upstream {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Cancellable for Upstream {
        fn cancel(&self) -> Result<(), TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TaskError::AlreadyCompleted)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn cancel_forwards_to_linked_upstream_once() {
        let upstream = Arc::new(Upstream {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let task = Task::<()>::from_work(|| Ok(()));
        task.link(&upstream);
        task.cancel().unwrap();
        let _ = task.cancel();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn linked_cancel_failure_is_swallowed() {
        let upstream = Arc::new(Upstream {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let task = Task::<()>::from_work(|| Ok(()));
        task.link(&upstream);
        assert!(task.cancel().is_ok());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_upstream_is_ignored() {
        let upstream = Arc::new(Upstream {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let task = Task::<()>::from_work(|| Ok(()));
        task.link(&upstream);
        drop(upstream);
        assert!(task.cancel().is_ok());
    }

    #[test]
    fn linking_a_cancelled_task_cancels_upstream_immediately() {
        let upstream = Task::<()>::from_work(|| Ok(()));
        let task = Task::<()>::cancelled();
        task.link_task(&upstream);
        assert_eq!(upstream.kind(), StatusKind::Cancelled);
    }

    #[test]
    fn completion_does_not_touch_linked_upstream() {
        let upstream = Task::<()>::from_work(|| Ok(()));
        let task = Task::from_work(|| Ok(1));
        task.link_task(&upstream);
        task.run();
        assert_eq!(upstream.kind(), StatusKind::New);
    }

    #[test]
    fn wait_blocks_until_worker_completes() {
        let pool = WorkerPool::new("wait-test", 2).unwrap();
        let task = Task::spawn(&pool.queue(), || {
            std::thread::sleep(Duration::from_millis(20));
            Ok(99)
        });
        assert_eq!(task.wait().unwrap(), 99);
    }

    #[test]
    fn wait_reports_cancellation_and_failure() {
        assert!(matches!(
            Task::<i32>::cancelled().wait(),
            Err(TaskError::Cancelled)
        ));
        assert!(matches!(
            Task::<i32>::failed(Failure::msg("x")).wait(),
            Err(TaskError::Failed(_))
        ));
    }

    #[test]
    fn wait_timeout_expires_for_unscheduled_work() {
        let task = Task::from_work(|| Ok(1));
        assert!(matches!(
            task.wait_timeout(Duration::from_millis(10)),
            Err(TaskError::TimedOut(_))
        ));
    }

    #[test]
    fn task_is_a_future() {
        let pool = WorkerPool::new("future-test", 1).unwrap();
        let task = Task::spawn(&pool.queue(), || Ok(String::from("async")));
        assert_eq!(block_on(task).unwrap(), "async");
    }

    #[test]
    fn debug_shows_id_and_status() {
        let task = Task::resolved(1);
        let debug = format!("{task:?}");
        assert!(debug.contains("Success"));
        assert!(debug.contains("TaskId"));
    }
}
