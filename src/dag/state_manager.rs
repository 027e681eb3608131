// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use std::collections::HashSet;

use tracing::debug;

use crate::dag::graph::TaskGraph;
use crate::dag::task_info::{RunState, ScheduledTask, TaskInfo};

/// Manages per-run state transitions for tasks.
pub struct StateManager<'a> {
    graph: &'a TaskGraph,
    tasks: &'a mut [TaskInfo],
}

/// Tasks released by one readiness sweep.
#[derive(Debug, Default)]
pub struct ReadySweep {
    pub scheduled: Vec<ScheduledTask>,
    pub gates_passed: Vec<usize>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, tasks: &'a mut [TaskInfo]) -> Self {
        Self { graph, tasks }
    }

    /// Include `root` and all its downstream dependents in this run.
    ///
    /// Tasks already participating keep their current state.
    pub fn mark_task_and_dependents_pending(&mut self, root: usize) {
        let mut stack: Vec<usize> = vec![root];
        let mut visited: HashSet<usize> = HashSet::new();

        while let Some(index) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }

            if let Some(info) = self.tasks.get_mut(index) {
                if info.run_state.is_none() {
                    info.run_state = Some(RunState::Pending);
                }
                stack.extend(self.graph.dependents_of(index).iter().copied());
            }
        }
    }

    /// Whether every predecessor of `info` completed successfully.
    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        ReadOnlyStateManager::new(self.tasks).deps_satisfied_for_info(info)
    }

    /// Mark all pending or running dependents (transitively) of a failed task
    /// as `DoneFailed`.
    ///
    /// Returns the newly failed tasks, excluding `failed_task`.
    pub fn mark_dependents_failed(&mut self, failed_task: usize) -> Vec<usize> {
        let mut stack: Vec<usize> = self.graph.dependents_of(failed_task).to_vec();
        let mut newly_failed = Vec::new();

        while let Some(index) = stack.pop() {
            if let Some(info) = self.tasks.get_mut(index) {
                match info.run_state {
                    Some(RunState::Pending) | Some(RunState::Running) => {
                        info.run_state = Some(RunState::DoneFailed);
                        debug!(
                            task = %info.key,
                            "marking dependent as DoneFailed due to upstream failure"
                        );
                        newly_failed.push(index);
                        stack.extend(self.graph.dependents_of(index).iter().copied());
                    }
                    Some(RunState::DoneSuccess) | Some(RunState::DoneFailed) | None => {}
                }
            }
        }

        newly_failed
    }

    /// Mark every pending task as failed without running it.
    pub fn cancel_pending(&mut self) -> Vec<usize> {
        let mut cancelled = Vec::new();
        for info in self.tasks.iter_mut() {
            if info.run_state == Some(RunState::Pending) {
                info.run_state = Some(RunState::DoneFailed);
                cancelled.push(info.index);
            }
        }
        cancelled
    }

    /// Release every pending task whose predecessors are done.
    ///
    /// Gates are passed on the spot and the sweep repeats until no gate
    /// unblocks anything further; real tasks are marked `Running` and
    /// returned for dispatch in index order.
    pub fn collect_new_ready_tasks(&mut self) -> ReadySweep {
        let mut sweep = ReadySweep::default();

        loop {
            let candidates: Vec<usize> = self
                .tasks
                .iter()
                .filter(|info| {
                    matches!(info.run_state, Some(RunState::Pending))
                        && self.deps_satisfied_for_info(info)
                })
                .map(|info| info.index)
                .collect();

            let mut passed_gate = false;
            for index in candidates {
                let info = &mut self.tasks[index];
                if info.is_gate {
                    info.run_state = Some(RunState::DoneSuccess);
                    debug!(task = %info.key, "gate passed");
                    sweep.gates_passed.push(index);
                    passed_gate = true;
                } else {
                    debug!(task = %info.key, "dependencies satisfied; marking Running");
                    info.run_state = Some(RunState::Running);
                    sweep.scheduled.push(ScheduledTask::from_task_info(info));
                }
            }

            if !passed_gate {
                break;
            }
        }

        sweep
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        !self.tasks.iter().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }
}

/// A read-only view for dependency satisfaction checks.
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a [TaskInfo],
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a [TaskInfo]) -> Self {
        Self { tasks }
    }

    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        info.deps.iter().all(|&dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.run_state == Some(RunState::DoneSuccess))
        })
    }
}
