use crate::timer::TimerThread;
use crate::{DispatchError, Executor, Job, Queue};
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A FIFO execution context; the "main" queue of an application.
///
/// Jobs run one at a time, in submission order, on whichever thread drives
/// the queue. A GUI embedding drives it from its event loop with
/// [`SerialQueue::try_tick`]; tests usually call
/// [`SerialQueue::run_until_idle`] or [`SerialQueue::run_until`]. If nobody
/// needs to own the thread, [`SerialQueue::spawn_thread`] drives it from a
/// dedicated one.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<SerialInner>,
}

struct SerialInner {
    name: String,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    timer: TimerThread,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = unbounded();
        Self {
            inner: Arc::new(SerialInner {
                timer: TimerThread::new(format!("{name}-timer")),
                name,
                tx,
                rx,
            }),
        }
    }

    /// Create a queue driven by its own named thread.
    ///
    /// The thread keeps draining until every handle to the queue is gone.
    pub fn spawn_thread(name: impl Into<String>) -> Result<Self, DispatchError> {
        let queue = Self::new(name);
        let rx = queue.inner.rx.clone();
        std::thread::Builder::new()
            .name(queue.inner.name.clone())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })?;
        Ok(queue)
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self.clone())
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.rx.len()
    }

    /// Block until one job is available and run it.
    pub fn tick(&self) -> Result<(), DispatchError> {
        match self.inner.rx.recv() {
            Ok(job) => job(),
            Err(_) => return Err(DispatchError::Disconnected),
        }
        Ok(())
    }

    /// Run one job if one is ready. Returns whether a job ran.
    pub fn try_tick(&self) -> bool {
        match self.inner.rx.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }

    /// Run jobs until the queue is empty, including jobs queued by the jobs
    /// themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.try_tick() {
            ran += 1;
        }
        ran
    }

    /// Drive the queue until `done` returns true or `timeout` elapses.
    ///
    /// `done` is checked before waiting and after every job, so delayed jobs
    /// and jobs submitted from other threads are picked up as they arrive.
    pub fn run_until(
        &self,
        mut done: impl FnMut() -> bool,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DispatchError::Timeout(timeout));
            }
            match self.inner.rx.recv_timeout(remaining) {
                Ok(job) => job(),
                Err(RecvTimeoutError::Timeout) => {
                    return if done() {
                        Ok(())
                    } else {
                        Err(DispatchError::Timeout(timeout))
                    };
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DispatchError::Disconnected),
            }
        }
    }
}

impl Executor for SerialQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, job: Job) {
        // The queue owns a receiver, so the channel cannot be disconnected
        // while `self` is alive.
        self.inner.tx.send(job).ok();
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        let tx = self.inner.tx.clone();
        let armed = self.inner.timer.schedule(
            delay,
            Box::new(move || {
                tx.send(job).ok();
            }),
        );
        if let Err(err) = armed {
            tracing::error!(queue = %self.inner.name, error = %err, "failed to arm delayed job; job dropped");
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}
