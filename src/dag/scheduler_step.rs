// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::ScheduledTask;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Real tasks that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Gates passed during this step, in the order they were passed.
    pub gates_passed: Vec<usize>,
    /// Tasks newly marked as failed in this step (the failed task itself,
    /// blocked dependents, or cancelled tasks).
    pub newly_failed: Vec<usize>,
    /// Whether this step caused the run to finish.
    pub run_just_finished: bool,
}
