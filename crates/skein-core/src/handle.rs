//! Type-erased task handles, so tasks with different value types can share
//! a [`TaskGroup`](crate::group::TaskGroup) or a
//! [`TaskStorage`](crate::storage::TaskStorage).

use crate::error::TaskError;
use crate::status::{Failure, StatusKind};
use crate::task::{Cancellable, Task, TaskId, WeakTask};
use skein_dispatch::Queue;
use std::fmt;
use std::sync::Arc;

trait ErasedTask: Send + Sync {
    fn id(&self) -> TaskId;
    fn kind(&self) -> StatusKind;
    fn failure(&self) -> Option<Failure>;
    fn cancel(&self) -> Result<(), TaskError>;
    fn observe(&self, queue: &Queue, callback: Box<dyn FnOnce(&TaskHandle) + Send>);
    fn downgrade(&self) -> Arc<dyn ErasedWeak>;
}

trait ErasedWeak: Send + Sync {
    fn upgrade(&self) -> Option<TaskHandle>;
}

impl<T: Clone + Send + 'static> ErasedWeak for WeakTask<T> {
    fn upgrade(&self) -> Option<TaskHandle> {
        WeakTask::upgrade(self).map(TaskHandle::from)
    }
}

impl<T: Clone + Send + 'static> ErasedTask for Task<T> {
    fn id(&self) -> TaskId {
        Task::id(self)
    }

    fn kind(&self) -> StatusKind {
        Task::kind(self)
    }

    fn failure(&self) -> Option<Failure> {
        Task::failure(self)
    }

    fn cancel(&self) -> Result<(), TaskError> {
        Task::cancel(self)
    }

    fn observe(&self, queue: &Queue, callback: Box<dyn FnOnce(&TaskHandle) + Send>) {
        self.notify(queue, move |task| callback(&TaskHandle::from(task)));
    }

    fn downgrade(&self) -> Arc<dyn ErasedWeak> {
        Arc::new(Task::downgrade(self))
    }
}

/// A task whose value type has been forgotten.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<dyn ErasedTask>,
}

impl TaskHandle {
    pub fn new<T: Clone + Send + 'static>(task: &Task<T>) -> Self {
        Self {
            task: Arc::new(task.clone()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn kind(&self) -> StatusKind {
        self.task.kind()
    }

    pub fn is_completed(&self) -> bool {
        self.task.kind().is_terminal()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.task.failure()
    }

    pub fn cancel(&self) -> Result<(), TaskError> {
        self.task.cancel()
    }

    /// Run `callback` on `queue` once the underlying task is terminal.
    ///
    /// The registration does not hold a handle to the task itself.
    pub fn observe<F>(&self, queue: &Queue, callback: F)
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
    {
        self.task.observe(queue, Box::new(callback));
    }

    /// Whether both handles wrap the same task.
    pub fn same(&self, other: &TaskHandle) -> bool {
        self.id() == other.id()
    }

    pub(crate) fn downgrade(&self) -> WeakTaskHandle {
        WeakTaskHandle {
            task: self.task.downgrade(),
        }
    }
}

/// A [`TaskHandle`] that does not keep its task alive.
#[derive(Clone)]
pub(crate) struct WeakTaskHandle {
    task: Arc<dyn ErasedWeak>,
}

impl WeakTaskHandle {
    pub(crate) fn upgrade(&self) -> Option<TaskHandle> {
        self.task.upgrade()
    }
}

impl<T: Clone + Send + 'static> From<Task<T>> for TaskHandle {
    fn from(task: Task<T>) -> Self {
        Self {
            task: Arc::new(task),
        }
    }
}

impl<T: Clone + Send + 'static> From<&Task<T>> for TaskHandle {
    fn from(task: &Task<T>) -> Self {
        Self::new(task)
    }
}

impl Cancellable for TaskHandle {
    fn cancel(&self) -> Result<(), TaskError> {
        self.task.cancel()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("status", &self.kind())
            .finish()
    }
}
