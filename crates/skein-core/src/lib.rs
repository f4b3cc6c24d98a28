//! skein-core: cancellable tasks for view-model layers
//!
//! A [`Task`] is a single-assignment, cancellable future. Producers resolve
//! it through a [`Source`]; consumers observe it with `notify` or derive new
//! tasks with the combinators in [`chain`]. [`TaskGroup`] aggregates a fixed
//! set of tasks, and [`TaskStorage`] tracks the in-flight work of one owner
//! with tag-based supersession and a drain signal.
//!
//! # Architecture
//!
//! ```text
//! Source ──resolves──▶ Task ──notify/chain──▶ derived Task
//!                        │
//!                        ├──▶ TaskGroup  (when_all / when_any)
//!                        └──▶ TaskStorage (append / cancel_all / drain)
//! ```
//!
//! Every callback runs on a caller-chosen [`Queue`]; the engine creates no
//! threads of its own. [`config::build_contexts`] is where an application
//! creates its default main and background contexts.
//!
//! # Modules
//!
//! - `status`: Status, StatusKind and the shared failure payload
//! - `task`: The task itself, linked cancellation and blocking waits
//! - `source`: Completion sources
//! - `chain`: chain / map / observer / delay / timeout combinators
//! - `handle`: Type-erased task handles
//! - `group`: TaskGroup
//! - `storage`: Tagged task storage
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod error;
pub mod group;
pub mod handle;
pub mod logging;
pub mod source;
pub mod status;
pub mod storage;
pub mod task;

pub use error::{ConfigError, Error, Result, TaskError};
pub use group::{GroupDelegate, TaskGroup};
pub use handle::TaskHandle;
pub use source::Source;
pub use status::{Failure, Status, StatusKind};
pub use storage::{StoragePhase, StorageSnapshot, TaskStorage};
pub use task::{Cancellable, Task, TaskId};

pub use skein_dispatch::{Contexts, Queue, SerialQueue, Strand, WorkerPool, block_on};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
