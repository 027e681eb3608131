// src/dag/mod.rs

//! Task model and scheduling.
//!
//! - [`target`] interns configured targets.
//! - [`task`] defines task nodes, gates and definition signatures.
//! - [`graph`] holds the acyclic task graph, indexed by plan position.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, and when dependents can be scheduled.
//! - [`task_info`] provides task metadata and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod target;
pub mod task;
pub mod task_info;

pub use graph::TaskGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use target::{ConfiguredTarget, TargetRegistry};
pub use task::{Task, TaskAction, TaskNode};
pub use task_info::{ScheduledTask, TaskRunState};
