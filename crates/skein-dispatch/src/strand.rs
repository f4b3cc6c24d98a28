use crate::{Executor, Job, Queue, timer};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A serial execution context with no thread of its own.
///
/// The first submitter finds the strand idle and drains it on its own
/// thread; anything submitted meanwhile (from any thread, including from a
/// job running on the strand) is appended and run by that drainer. Jobs
/// therefore never overlap and run in arrival order, and no lock is held
/// while a job runs.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

struct StrandInner {
    name: String,
    state: Mutex<StrandState>,
}

#[derive(Default)]
struct StrandState {
    jobs: VecDeque<Job>,
    draining: bool,
}

/// Runs when a job unwinds out of a drain. Clears the draining flag and
/// hands any jobs still queued to the timer thread, so work submitted during
/// the panicking job is not stranded until the next submit.
struct UnwindReset<'a>(&'a Arc<StrandInner>);

impl Drop for UnwindReset<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let stranded = {
            let mut state = self.0.state.lock();
            state.draining = false;
            state.jobs.len()
        };
        if stranded > 0 {
            tracing::debug!(strand = %self.0.name, stranded, "resuming strand after panic");
            let inner = Arc::clone(self.0);
            let resumed = timer::shared().schedule(Duration::ZERO, Box::new(move || inner.resume()));
            if let Err(err) = resumed {
                tracing::error!(strand = %self.0.name, error = %err, "strand jobs stranded after panic");
            }
        }
    }
}

impl Strand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StrandInner {
                name: name.into(),
                state: Mutex::new(StrandState::default()),
            }),
        }
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self.clone())
    }

    /// Whether some thread is currently draining the strand.
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }
}

impl StrandInner {
    fn submit(self: &Arc<Self>, job: Job) {
        {
            let mut state = self.state.lock();
            state.jobs.push_back(job);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Pick up queued jobs nobody is draining.
    fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.draining || state.jobs.is_empty() {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Run queued jobs until the queue is empty. The caller must have set
    /// `draining`.
    fn drain(self: &Arc<Self>) {
        let _reset = UnwindReset(self);
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }
}

impl Executor for Strand {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, job: Job) {
        self.inner.submit(job);
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        let inner = Arc::clone(&self.inner);
        let armed = timer::shared().schedule(delay, Box::new(move || inner.submit(job)));
        if let Err(err) = armed {
            tracing::error!(strand = %self.inner.name, error = %err, "strand timer unavailable; job dropped");
        }
    }
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strand")
            .field("name", &self.inner.name)
            .finish()
    }
}
