use crate::{DispatchError, Executor, Job, Queue};
use async_executor::Executor as AsyncExecutor;
use async_io::Timer;
use flume::{Sender, bounded};
use std::sync::Arc;
use std::time::Duration;

/// A set of OS threads all driving one shared `async_executor::Executor`.
///
/// The threads exit once the driver is dropped: dropping the shutdown sender
/// completes the future each thread is running the executor against.
pub(crate) struct AsyncDriver {
    executor: Arc<AsyncExecutor<'static>>,
    _shutdown: Sender<()>,
}

impl AsyncDriver {
    pub(crate) fn start(name: &str, threads: usize) -> Result<Self, DispatchError> {
        let executor = Arc::new(AsyncExecutor::new());
        let (shutdown, signal) = bounded::<()>(1);

        for idx in 0..threads.max(1) {
            let executor = Arc::clone(&executor);
            let signal = signal.clone();
            std::thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || {
                    async_io::block_on(executor.run(async move {
                        let _ = signal.recv_async().await;
                    }));
                })?;
        }

        tracing::debug!(pool = name, threads, "started async driver");
        Ok(Self {
            executor,
            _shutdown: shutdown,
        })
    }

    pub(crate) fn spawn(&self, job: Job) {
        self.executor.spawn(async move { job() }).detach();
    }

    pub(crate) fn spawn_after(&self, delay: Duration, job: Job) {
        self.executor
            .spawn(async move {
                Timer::after(delay).await;
                job();
            })
            .detach();
    }
}

/// Background execution context backed by a fixed number of worker threads.
///
/// Jobs may run concurrently and in any order. Cloning the pool is cheap;
/// the threads stop when the last clone is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    threads: usize,
    driver: AsyncDriver,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, DispatchError> {
        let name = name.into();
        let threads = threads.max(1);
        let driver = AsyncDriver::start(&name, threads)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                threads,
                driver,
            }),
        })
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self.clone())
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, job: Job) {
        self.inner.driver.spawn(job);
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        self.inner.driver.spawn_after(delay, job);
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("threads", &self.inner.threads)
            .finish()
    }
}
