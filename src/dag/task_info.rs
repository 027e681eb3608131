// src/dag/task_info.rs

//! Per-task scheduling metadata and per-run state.

/// Per-run state of a task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on predecessors.
    Pending,
    /// Dispatched to the executor.
    Running,
    /// Completed successfully, was up to date, or is a gate that was passed.
    DoneSuccess,
    /// Failed, was blocked by a failed predecessor, or was cancelled.
    DoneFailed,
}

/// Public, read-only view of a task's per-run state.
///
/// This is exposed for tests and diagnostics without leaking the internal
/// `RunState` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    /// The task is not participating in the run.
    NotInRun,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
}

impl From<Option<RunState>> for TaskRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => TaskRunState::NotInRun,
            Some(RunState::Pending) => TaskRunState::Pending,
            Some(RunState::Running) => TaskRunState::Running,
            Some(RunState::DoneSuccess) => TaskRunState::DoneSuccess,
            Some(RunState::DoneFailed) => TaskRunState::DoneFailed,
        }
    }
}

/// Static scheduling information for one task, plus its per-run state.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub index: usize,
    pub key: String,
    /// Gates are passed synchronously by the scheduler.
    pub is_gate: bool,
    /// Direct predecessors.
    pub deps: Vec<usize>,

    /// Per-run state (None if not participating in the current run).
    pub run_state: Option<RunState>,
}

/// A task the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub index: usize,
    pub key: String,
}

impl ScheduledTask {
    pub fn from_task_info(info: &TaskInfo) -> Self {
        Self {
            index: info.index,
            key: info.key.clone(),
        }
    }
}
