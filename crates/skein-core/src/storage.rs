//! Tagged task storage: the in-flight work of one owner (typically a
//! view-model).
//!
//! The storage is either `Idle` (nothing tracked) or `Active`. Each
//! Idle -> Active transition arms a fresh drain signal; the matching
//! Active -> Idle transition fires it. Tagged appends supersede the previous
//! task under the same tag, cancelling it.
//!
//! Removal of finished tasks is serialised on the storage's own [`Strand`].

use crate::handle::TaskHandle;
use crate::source::Source;
use crate::task::{Task, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skein_dispatch::{Queue, Strand};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePhase {
    Idle,
    Active,
}

impl fmt::Display for StoragePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Point-in-time view of a storage, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub name: String,
    pub phase: StoragePhase,
    pub tracked: Vec<TaskId>,
    pub tags: BTreeMap<String, TaskId>,
    /// Completed Idle -> Active -> Idle cycles.
    pub drain_cycles: u64,
}

pub struct TaskStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    name: String,
    strand: Strand,
    state: Mutex<StorageState>,
}

#[derive(Default)]
struct StorageState {
    tracked: Vec<TaskHandle>,
    tags: HashMap<String, TaskHandle>,
    drain: Option<Source<()>>,
    cycles: u64,
}

impl TaskStorage {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(StorageInner {
                strand: Strand::new(format!("{name}-storage")),
                name,
                state: Mutex::new(StorageState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Track `task`, optionally under `tag`.
    ///
    /// A different task already registered under `tag` is cancelled
    /// (best-effort) before `task` takes its place. The returned task
    /// mirrors `task` and completes only after `task` has been removed from
    /// the storage; cancelling it cancels `task`.
    pub fn append<T>(&self, task: Task<T>, tag: Option<&str>) -> Task<T>
    where
        T: Clone + Send + 'static,
    {
        let handle = TaskHandle::from(&task);
        let previous = {
            let mut state = self.inner.state.lock();
            if state.tracked.is_empty() {
                state.drain = Some(Source::new());
                debug!(storage = %self.inner.name, "storage active");
            }
            if !state.tracked.iter().any(|tracked| tracked.same(&handle)) {
                state.tracked.push(handle.clone());
            }
            tag.and_then(|tag| state.tags.get(tag).cloned())
        };

        if let Some(tag) = tag {
            if let Some(previous) = previous.filter(|previous| !previous.same(&handle)) {
                trace!(
                    storage = %self.inner.name,
                    tag,
                    task_id = %previous.id(),
                    "superseding tagged task"
                );
                let _ = previous.cancel();
            }
            // Another append may have claimed the tag in the meantime.
            let displaced = self
                .inner
                .state
                .lock()
                .tags
                .insert(tag.to_string(), handle.clone());
            if let Some(displaced) =
                displaced.filter(|d| !d.same(&handle) && !d.is_completed())
            {
                let _ = displaced.cancel();
            }
        }

        let forward = Source::new();
        let returned = forward.task();
        returned.link_task(&task);

        let weak = Arc::downgrade(&self.inner);
        task.notify(&self.inner.strand.queue(), move |finished| {
            if let Some(inner) = weak.upgrade() {
                inner.remove(finished.id());
            }
            let _ = forward.resolve(finished.status());
        });
        returned
    }

    /// Request cancellation of every tracked task; does not wait. Returns how
    /// many were actually cancelled.
    pub fn cancel_all(&self) -> usize {
        let tracked = self.inner.state.lock().tracked.clone();
        let cancelled = tracked
            .iter()
            .filter(|handle| handle.cancel().is_ok())
            .count();
        debug!(storage = %self.inner.name, cancelled, "cancelled tracked tasks");
        cancelled
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().tracked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().tracked.len()
    }

    pub fn phase(&self) -> StoragePhase {
        if self.is_empty() {
            StoragePhase::Idle
        } else {
            StoragePhase::Active
        }
    }

    /// The drain signal of the current Active period, if any.
    pub fn drain_signal(&self) -> Option<Task<()>> {
        self.inner.state.lock().drain.as_ref().map(Source::task)
    }

    /// Resolves at the next Active -> Idle transition, or at once when Idle.
    pub fn when_drained(&self) -> Task<()> {
        self.drain_signal().unwrap_or_else(|| Task::resolved(()))
    }

    /// The task currently registered under `tag`.
    pub fn task_for_tag(&self, tag: &str) -> Option<TaskHandle> {
        self.inner.state.lock().tags.get(tag).cloned()
    }

    pub fn snapshot(&self) -> StorageSnapshot {
        let state = self.inner.state.lock();
        StorageSnapshot {
            name: self.inner.name.clone(),
            phase: if state.tracked.is_empty() {
                StoragePhase::Idle
            } else {
                StoragePhase::Active
            },
            tracked: state.tracked.iter().map(TaskHandle::id).collect(),
            tags: state
                .tags
                .iter()
                .map(|(tag, handle)| (tag.clone(), handle.id()))
                .collect(),
            drain_cycles: state.cycles,
        }
    }

    /// The queue removals are serialised on.
    pub fn queue(&self) -> Queue {
        self.inner.strand.queue()
    }

    #[cfg(test)]
    fn downgrade(&self) -> std::sync::Weak<StorageInner> {
        Arc::downgrade(&self.inner)
    }
}

impl StorageInner {
    fn remove(&self, id: TaskId) {
        let (drained, tracked) = {
            let mut state = self.state.lock();
            let before = state.tracked.len();
            state.tracked.retain(|handle| handle.id() != id);
            if state.tracked.len() == before {
                return;
            }
            state.tags.retain(|_, handle| handle.id() != id);
            let drained = if state.tracked.is_empty() {
                state.cycles += 1;
                state.drain.take()
            } else {
                None
            };
            (drained, state.tracked.len())
        };
        trace!(storage = %self.name, task_id = %id, tracked, "tracked task removed");

        if let Some(drain) = drained {
            debug!(storage = %self.name, "storage idle");
            let _ = drain.complete(());
        }
    }
}

impl Drop for TaskStorage {
    fn drop(&mut self) {
        let drain = self.inner.state.lock().drain.take();
        if let Some(drain) = drain {
            let _ = drain.cancel();
        }
        self.cancel_all();
    }
}

impl fmt::Debug for TaskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStorage")
            .field("name", &self.inner.name)
            .field("tracked", &self.len())
            .finish()
    }
}
