use crate::pool::AsyncDriver;
use crate::{DispatchError, Job};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;
use std::time::Duration;

/// A single background thread that arms `async_io` timers, started the first
/// time a delayed job is scheduled.
pub(crate) struct TimerThread {
    name: String,
    driver: Mutex<Option<AsyncDriver>>,
}

impl TimerThread {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: Mutex::new(None),
        }
    }

    /// Run `job` on the timer thread once `delay` has elapsed.
    ///
    /// A panicking job is logged and does not take the timer thread down.
    pub(crate) fn schedule(&self, delay: Duration, job: Job) -> Result<(), DispatchError> {
        let mut driver = self.driver.lock();
        if driver.is_none() {
            *driver = Some(AsyncDriver::start(&self.name, 1)?);
        }
        if let Some(driver) = driver.as_ref() {
            let timer = self.name.clone();
            driver.spawn_after(
                delay,
                Box::new(move || {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(timer = %timer, "delayed job panicked");
                    }
                }),
            );
        }
        Ok(())
    }

    pub(crate) fn is_started(&self) -> bool {
        self.driver.lock().is_some()
    }
}

/// The timer serving contexts that have no thread of their own
/// ([`Inline`](crate::Inline) and [`Strand`](crate::Strand)). Its one thread
/// starts on first use; pending delays are `async_io` timers, not parked
/// threads.
pub(crate) fn shared() -> &'static TimerThread {
    static SHARED: OnceLock<TimerThread> = OnceLock::new();
    SHARED.get_or_init(|| TimerThread::new("skein-timer"))
}
