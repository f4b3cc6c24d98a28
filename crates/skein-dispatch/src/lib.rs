//! skein-dispatch: execution contexts for the skein task engine.
//!
//! The task engine never creates threads on its own. Everything that runs a
//! callback takes a [`Queue`], which is a named handle over some
//! [`Executor`]. This crate provides the executors an embedding application
//! typically wires up:
//!
//! - [`Inline`]: run on the calling thread
//! - [`SerialQueue`]: a FIFO "main/UI" queue driven by its owner
//! - [`WorkerPool`]: a set of background threads sharing one async executor
//! - [`Strand`]: a thread-less serial context for guarding per-instance state
//!
//! [`Contexts`] bundles a main and a background queue; it is the one place an
//! application chooses its defaults.

#![forbid(unsafe_code)]

mod error;
mod inline;
mod pool;
mod serial;
mod strand;
mod timer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use error::DispatchError;
pub use inline::Inline;
pub use pool::WorkerPool;
pub use serial::SerialQueue;
pub use strand::Strand;

/// Block the current thread until the passed future completes.
pub use async_io::block_on;

/// A unit of work submitted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run jobs, now or after a delay.
pub trait Executor: Send + Sync + 'static {
    /// Human readable name, used in tracing output.
    fn name(&self) -> &str;

    /// Run `job` on this context as soon as possible.
    fn execute(&self, job: Job);

    /// Run `job` on this context no earlier than `delay` from now.
    fn execute_after(&self, delay: Duration, job: Job);
}

/// Cloneable handle to an execution context.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<dyn Executor>,
}

impl Queue {
    pub fn new(executor: impl Executor) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub fn from_arc(executor: Arc<dyn Executor>) -> Self {
        Self { inner: executor }
    }

    /// A queue that runs everything synchronously on the calling thread.
    pub fn inline() -> Self {
        Self::new(Inline)
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn run<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.execute(Box::new(f));
    }

    pub fn run_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            self.inner.execute(Box::new(f));
        } else {
            self.inner.execute_after(delay, Box::new(f));
        }
    }

    /// Whether both handles point at the same executor instance.
    pub fn same(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("name", &self.name()).finish()
    }
}

/// The pair of contexts a view-model layer works with.
///
/// Chains default to the background queue, observers (success/fail/cancel
/// handlers) default to the main queue. Callers can always pass a different
/// queue per call; this type only names the defaults.
#[derive(Clone, Debug)]
pub struct Contexts {
    main: Queue,
    background: Queue,
}

impl Contexts {
    pub fn new(main: Queue, background: Queue) -> Self {
        Self { main, background }
    }

    /// Both roles served by the calling thread. Handy in tests.
    pub fn inline() -> Self {
        let queue = Queue::inline();
        Self {
            main: queue.clone(),
            background: queue,
        }
    }

    pub fn main(&self) -> &Queue {
        &self.main
    }

    pub fn background(&self) -> &Queue {
        &self.background
    }

    /// Default queue for `chain`-family combinators.
    pub fn chain_queue(&self) -> &Queue {
        &self.background
    }

    /// Default queue for `on_success` / `on_fail` / `on_cancel` observers.
    pub fn observer_queue(&self) -> &Queue {
        &self.main
    }
}
