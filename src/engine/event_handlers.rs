// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{RuntimeOptions, TaskOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// These gates were passed, in order.
    GatesPassed(Vec<usize>),
    /// Tasks marked failed by this step, including blocked dependents.
    TasksFailed(Vec<usize>),
    /// Every task is terminal and nothing is in flight.
    Finished,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Ready work waiting for a free worker, plus run-level flags.
#[derive(Debug)]
pub struct DispatchState {
    ready: VecDeque<ScheduledTask>,
    in_flight: usize,
    options: RuntimeOptions,
    /// No new work is released once set.
    pub cancelled: bool,
    /// Set when the caller asked for cancellation.
    pub cancel_requested: bool,
    /// Tasks that ran and failed.
    pub failures: usize,
    /// Tasks failed before the run started.
    pub pre_failed: usize,
}

impl DispatchState {
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            ready: VecDeque::new(),
            in_flight: 0,
            options,
            cancelled: false,
            cancel_requested: false,
            failures: 0,
            pre_failed: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.ready.len()
    }
}

/// Start the run, failing `pre_failed` tasks up front.
pub fn handle_start(
    scheduler: &mut Scheduler,
    dispatch: &mut DispatchState,
    pre_failed: &[usize],
) -> CoreStep {
    let mut commands = Vec::new();
    let step = scheduler.start_new_run(pre_failed);
    dispatch.pre_failed = pre_failed.len();
    apply_scheduler_step(step, dispatch, &mut commands);

    if !pre_failed.is_empty() && !dispatch.options.continue_after_errors {
        info!(
            pre_failed = pre_failed.len(),
            "construction errors and not continuing; cancelling build"
        );
        cancel_run(scheduler, dispatch, &mut commands);
    }

    finish_step(scheduler, dispatch, commands)
}

/// Handle completion of a dispatched task.
pub fn handle_task_finished(
    scheduler: &mut Scheduler,
    dispatch: &mut DispatchState,
    index: usize,
    outcome: TaskOutcome,
) -> CoreStep {
    let mut commands = Vec::new();
    dispatch.in_flight = dispatch.in_flight.saturating_sub(1);

    let success = outcome.is_success();
    let step = scheduler.step_completion(index, success);
    apply_scheduler_step(step, dispatch, &mut commands);

    if !success {
        dispatch.failures += 1;
        if !dispatch.options.continue_after_errors && !dispatch.cancelled {
            info!(index, "task failed; cancelling remaining work");
            cancel_run(scheduler, dispatch, &mut commands);
        }
    }

    finish_step(scheduler, dispatch, commands)
}

/// Handle an explicit cancellation request.
pub fn handle_cancel(scheduler: &mut Scheduler, dispatch: &mut DispatchState) -> CoreStep {
    let mut commands = Vec::new();
    dispatch.cancel_requested = true;
    if !dispatch.cancelled {
        cancel_run(scheduler, dispatch, &mut commands);
    }
    finish_step(scheduler, dispatch, commands)
}

fn apply_scheduler_step(
    step: SchedulerStep,
    dispatch: &mut DispatchState,
    commands: &mut Vec<CoreCommand>,
) {
    if !step.gates_passed.is_empty() {
        commands.push(CoreCommand::GatesPassed(step.gates_passed));
    }
    if !step.newly_failed.is_empty() {
        commands.push(CoreCommand::TasksFailed(step.newly_failed));
    }
    dispatch.ready.extend(step.newly_scheduled);
}

/// Fail everything not yet dispatched. In-flight tasks are left to finish.
fn cancel_run(scheduler: &mut Scheduler, dispatch: &mut DispatchState, commands: &mut Vec<CoreCommand>) {
    dispatch.cancelled = true;
    let queued: Vec<ScheduledTask> = dispatch.ready.drain(..).collect();
    for task in queued {
        let step = scheduler.step_completion(task.index, false);
        apply_scheduler_step(step, dispatch, commands);
    }
    let step = scheduler.cancel();
    apply_scheduler_step(step, dispatch, commands);
    // Anything the sweeps above released must not run either.
    dispatch.ready.clear();
}

/// Release ready work up to the worker limit and decide whether the loop
/// keeps running.
fn finish_step(
    scheduler: &Scheduler,
    dispatch: &mut DispatchState,
    mut commands: Vec<CoreCommand>,
) -> CoreStep {
    if !dispatch.cancelled {
        let free = dispatch.options.jobs.saturating_sub(dispatch.in_flight);
        let take = free.min(dispatch.ready.len());
        let batch: Vec<ScheduledTask> = dispatch.ready.drain(..take).collect();
        if !batch.is_empty() {
            dispatch.in_flight += batch.len();
            debug!(
                dispatched = batch.len(),
                in_flight = dispatch.in_flight,
                queued = dispatch.ready.len(),
                "releasing ready tasks"
            );
            commands.push(CoreCommand::DispatchTasks(batch));
        }
    }

    let done = dispatch.in_flight == 0 && (scheduler.is_idle() || dispatch.cancelled);
    if done {
        commands.push(CoreCommand::Finished);
    }
    CoreStep {
        commands,
        keep_running: !done,
    }
}
