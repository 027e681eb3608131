// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - turning passed gates into target events
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_cancel, handle_start, handle_task_finished, CoreStep, DispatchState,
};
use crate::engine::events::BuildStatus;
use crate::engine::{RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// This owns:
/// - the task scheduler (checked out of the engine cache for one build)
/// - the ready queue and worker accounting
/// - runtime options (worker limit, continue-after-errors)
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    dispatch: DispatchState,
    finished: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            dispatch: DispatchState::new(options),
            finished: false,
        }
    }

    /// Start the run. `pre_failed` tasks are failed with their dependents
    /// before anything is dispatched.
    pub fn start(&mut self, pre_failed: &[usize]) -> CoreStep {
        let step = handle_start(&mut self.scheduler, &mut self.dispatch, pre_failed);
        self.finished |= !step.keep_running;
        step
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        if self.finished {
            return CoreStep::default();
        }
        let step = match event {
            RuntimeEvent::TaskFinished { index, outcome } => {
                handle_task_finished(&mut self.scheduler, &mut self.dispatch, index, outcome)
            }
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler, &mut self.dispatch),
        };
        self.finished |= !step.keep_running;
        step
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Expose whether the scheduler is idle (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatch.in_flight()
    }

    pub fn status(&self) -> BuildStatus {
        if self.dispatch.cancel_requested {
            BuildStatus::Cancelled
        } else if self.dispatch.failures > 0 || self.dispatch.pre_failed > 0 {
            BuildStatus::Failed
        } else {
            BuildStatus::Succeeded
        }
    }

    /// Hand the scheduler back so its session can be reused.
    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::task::{GateKind, Task, TaskAction, TaskType};
    use crate::dag::TaskGraph;
    use crate::engine::{CoreCommand, TaskOutcome};
    use std::sync::Arc;

    fn gate(i: usize) -> Arc<Task> {
        Arc::new(Task::gate(format!("G{i}"), GateKind::TargetStart, format!("g{i}"), None))
    }

    fn real(i: usize) -> Arc<Task> {
        let mut t = Task::gate(format!("P{i}"), GateKind::PhaseEnd, format!("t{i}"), None);
        t.action = TaskAction::Process;
        t.task_type = TaskType::Tool("sh".to_string());
        Arc::new(t)
    }

    fn dispatched(step: &CoreStep) -> Vec<usize> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchTasks(tasks) => Some(tasks.iter().map(|t| t.index)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn finished(index: usize) -> RuntimeEvent {
        RuntimeEvent::TaskFinished {
            index,
            outcome: TaskOutcome::Success,
        }
    }

    fn core(tasks: &[Arc<Task>], edges: &[(usize, usize)], jobs: usize, keep_going: bool) -> CoreRuntime {
        let graph = TaskGraph::new(tasks.len(), edges.iter().copied()).unwrap();
        CoreRuntime::new(Scheduler::new(graph, tasks), RuntimeOptions::new(jobs, keep_going))
    }

    #[test]
    fn worker_limit_bounds_dispatch() {
        let tasks = vec![gate(0), real(1), real(2), real(3)];
        let mut core = core(&tasks, &[(0, 1), (0, 2), (0, 3)], 2, false);

        let step = core.start(&[]);
        assert_eq!(step.commands[0], CoreCommand::GatesPassed(vec![0]));
        assert_eq!(dispatched(&step), vec![1, 2]);
        assert_eq!(core.in_flight(), 2);

        let step = core.step(finished(1));
        assert_eq!(dispatched(&step), vec![3]);
        core.step(finished(2));
        let step = core.step(finished(3));
        assert!(step.commands.contains(&CoreCommand::Finished));
        assert!(!step.keep_running);
        assert_eq!(core.status(), BuildStatus::Succeeded);
    }

    #[test]
    fn failure_cancels_queued_work_but_not_in_flight() {
        let tasks = vec![real(0), real(1), real(2)];
        let mut core = core(&tasks, &[], 2, false);
        let step = core.start(&[]);
        assert_eq!(dispatched(&step), vec![0, 1]);

        let step = core.step(RuntimeEvent::TaskFinished {
            index: 0,
            outcome: TaskOutcome::Failed("exit 1".into()),
        });
        assert!(dispatched(&step).is_empty());
        assert!(step.commands.contains(&CoreCommand::TasksFailed(vec![2])));
        assert!(step.keep_running, "task 1 is still in flight");

        let step = core.step(finished(1));
        assert!(!step.keep_running);
        assert_eq!(core.status(), BuildStatus::Failed);
    }

    #[test]
    fn keep_going_only_skips_dependents() {
        let tasks = vec![real(0), real(1), real(2)];
        let mut core = core(&tasks, &[(0, 1)], 4, true);
        core.start(&[]);
        let step = core.step(RuntimeEvent::TaskFinished {
            index: 0,
            outcome: TaskOutcome::Failed("boom".into()),
        });
        assert!(step.commands.contains(&CoreCommand::TasksFailed(vec![0, 1])));
        assert!(step.keep_running);
        let step = core.step(finished(2));
        assert!(!step.keep_running);
        assert_eq!(core.status(), BuildStatus::Failed);
    }

    #[test]
    fn empty_plan_finishes_on_start() {
        let tasks = vec![gate(0), gate(1)];
        let mut core = core(&tasks, &[(0, 1)], 1, false);
        let step = core.start(&[]);
        assert_eq!(step.commands.first(), Some(&CoreCommand::GatesPassed(vec![0, 1])));
        assert!(!step.keep_running);
        assert!(core.is_finished());
    }

    #[test]
    fn cancel_request_reports_cancelled() {
        let tasks = vec![real(0), real(1)];
        let mut core = core(&tasks, &[(0, 1)], 1, true);
        core.start(&[]);
        let step = core.step(RuntimeEvent::CancelRequested);
        assert!(step.commands.contains(&CoreCommand::TasksFailed(vec![1])));
        let step = core.step(finished(0));
        assert!(!step.keep_running);
        assert_eq!(core.status(), BuildStatus::Cancelled);
    }
}
