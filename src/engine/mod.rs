// src/engine/mod.rs

//! Orchestration engine for buildplan.
//!
//! This module ties together:
//! - the task scheduler, bounded by a worker limit
//! - the main runtime event loop that reacts to:
//!   - task completion events
//!   - cancellation requests
//! - the build operation that looks up or constructs the description,
//!   checks out an execution session and runs it
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. Observers see the build through [`events`].

/// Result of one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// The task did not need to run.
    UpToDate,
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, TaskOutcome::Failed(_))
    }
}

/// Options the core runtime is built with.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Worker pool size; never less than one.
    pub jobs: usize,
    /// Keep scheduling unrelated work after a task failure.
    pub continue_after_errors: bool,
}

impl RuntimeOptions {
    pub fn new(jobs: usize, continue_after_errors: bool) -> Self {
        let jobs = if jobs == 0 {
            std::thread::available_parallelism().map_or(1, usize::from)
        } else {
            jobs
        };
        Self {
            jobs,
            continue_after_errors,
        }
    }
}

/// Events flowing into the runtime from executors and the caller.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched task finished.
    TaskFinished { index: usize, outcome: TaskOutcome },
    /// Stop scheduling new work; in-flight tasks finish.
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod events;
pub mod operation;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use events::{BuildDelegate, BuildEvent, BuildProgress, BuildStatus, EventSink, NullDelegate};
pub use operation::{BuildResult, BuildService, CancelHandle};
pub use runtime::Runtime;
