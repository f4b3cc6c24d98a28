//! Aggregation over a fixed set of tasks.
//!
//! A [`TaskGroup`] captures its members at construction and subscribes to
//! each of them. Member completions are funnelled through the group's own
//! [`Strand`], so completion counting, the per-member delegate and waiter
//! resolution all happen in one arrival order.
//!
//! - `when_any` waiters resolve when the first member completes (or at once
//!   if the group is empty or a member already completed).
//! - `when_all` waiters resolve when the last member completes (or at once
//!   if the group is empty or every member already completed).
//!
//! For groups of two or more members, "any" always resolves before "all".
//!
//! Completion is counted per list slot. A task listed twice occupies two
//! slots and is counted twice; both registrations fire when it completes, so
//! the count still reaches the list length.
//!
//! Pending members keep the group (and its waiters) alive; the group only
//! holds its members weakly. A member nobody else references can never
//! complete, so once it is released the group goes with it and any
//! outstanding waiters fail with `SourceDropped`.

use crate::handle::{TaskHandle, WeakTaskHandle};
use crate::source::Source;
use crate::task::Task;
use parking_lot::Mutex;
use skein_dispatch::{Queue, Strand};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Called once per member completion, in completion order.
pub type GroupDelegate = Box<dyn Fn(&TaskGroup, &TaskHandle) + Send + Sync>;

#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    members: Vec<WeakTaskHandle>,
    strand: Strand,
    state: Mutex<GroupState>,
    delegate: Option<GroupDelegate>,
}

#[derive(Default)]
struct GroupState {
    completed: usize,
    any_waiters: Vec<Source<TaskGroup>>,
    all_waiters: Vec<Source<TaskGroup>>,
}

impl TaskGroup {
    pub fn new(members: Vec<TaskHandle>) -> Self {
        Self::build(members, None)
    }

    /// A group whose `delegate` hears about every member completion.
    pub fn with_delegate<F>(members: Vec<TaskHandle>, delegate: F) -> Self
    where
        F: Fn(&TaskGroup, &TaskHandle) + Send + Sync + 'static,
    {
        Self::build(members, Some(Box::new(delegate)))
    }

    fn build(members: Vec<TaskHandle>, delegate: Option<GroupDelegate>) -> Self {
        let group = Self {
            inner: Arc::new(GroupInner {
                members: members.iter().map(TaskHandle::downgrade).collect(),
                strand: Strand::new("task-group"),
                state: Mutex::new(GroupState::default()),
                delegate,
            }),
        };

        let strand = group.inner.strand.queue();
        for member in &members {
            let this = group.clone();
            member.observe(&strand, move |finished| this.member_completed(finished));
        }
        group
    }

    fn member_completed(&self, finished: &TaskHandle) {
        let total = self.inner.members.len();
        let (any, all, completed) = {
            let mut state = self.inner.state.lock();
            state.completed += 1;
            let any = if state.completed == 1 {
                std::mem::take(&mut state.any_waiters)
            } else {
                Vec::new()
            };
            let all = if state.completed == total {
                std::mem::take(&mut state.all_waiters)
            } else {
                Vec::new()
            };
            (any, all, state.completed)
        };
        trace!(
            task_id = %finished.id(),
            status = %finished.kind(),
            completed,
            total,
            "group member completed"
        );

        if let Some(delegate) = &self.inner.delegate {
            delegate(self, finished);
        }
        for waiter in any {
            let _ = waiter.complete(self.clone());
        }
        for waiter in all {
            let _ = waiter.complete(self.clone());
        }
    }

    /// A task that succeeds, carrying the group, once every member is
    /// terminal.
    pub fn when_all(&self) -> Task<TaskGroup> {
        let source = Source::new();
        let task = source.task();
        {
            let mut state = self.inner.state.lock();
            if state.completed < self.inner.members.len() {
                state.all_waiters.push(source);
                return task;
            }
        }
        let _ = source.complete(self.clone());
        task
    }

    /// A task that succeeds, carrying the group, once the first member is
    /// terminal.
    pub fn when_any(&self) -> Task<TaskGroup> {
        let source = Source::new();
        let task = source.task();
        {
            let mut state = self.inner.state.lock();
            if state.completed == 0 && !self.inner.members.is_empty() {
                state.any_waiters.push(source);
                return task;
            }
        }
        let _ = source.complete(self.clone());
        task
    }

    /// Members that are still alive, in list order.
    pub fn members(&self) -> Vec<TaskHandle> {
        self.inner
            .members
            .iter()
            .filter_map(WeakTaskHandle::upgrade)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.is_empty()
    }

    /// Member completions processed so far.
    pub fn completed_count(&self) -> usize {
        self.inner.state.lock().completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count() == self.len()
    }

    /// Request cancellation of every member; returns how many were actually
    /// cancelled (members that had already completed are skipped).
    pub fn cancel_all(&self) -> usize {
        self.members()
            .iter()
            .filter(|member| member.cancel().is_ok())
            .count()
    }

    /// The queue completions are serialised on.
    pub fn queue(&self) -> Queue {
        self.inner.strand.queue()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("members", &self.len())
            .field("completed", &self.completed_count())
            .finish()
    }
}
