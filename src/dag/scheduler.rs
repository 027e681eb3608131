use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::task::Task;
use crate::dag::task_info::{RunState, TaskInfo, TaskRunState};

/// Scheduler holds the immutable task graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a task is ready (all predecessors done)
/// - passing gates synchronously as soon as they are ready
/// - failing dependents when a task fails
/// - cancelling everything still pending on request
///
/// A scheduler is reusable: each build calls [`Scheduler::start_new_run`],
/// which resets per-run state without re-planning the graph.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    tasks: Vec<TaskInfo>,
    /// Monotonically increasing run ID.
    run_counter: u64,
    /// Currently active run ID, or `None` if there is no active run.
    current_run_id: Option<u64>,
}

impl Scheduler {
    /// Construct a scheduler over `tasks`, which must be indexed like `graph`.
    pub fn new(graph: TaskGraph, tasks: &[impl AsRef<Task>]) -> Self {
        let infos = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let task = task.as_ref();
                TaskInfo {
                    index,
                    key: task.key.clone(),
                    is_gate: task.is_gate(),
                    deps: graph.predecessors_of(index).to_vec(),
                    run_state: None,
                }
            })
            .collect();

        Self {
            graph,
            tasks: infos,
            run_counter: 0,
            current_run_id: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_run_id.is_none()
    }

    /// Number of runs started so far.
    pub fn runs_started(&self) -> u64 {
        self.run_counter
    }

    pub fn run_state_of(&self, index: usize) -> Option<TaskRunState> {
        let info = self.tasks.get(index)?;
        Some(info.run_state.into())
    }

    /// Start a new run over the whole graph.
    ///
    /// `pre_failed` tasks (for example tasks of targets whose construction
    /// failed) are failed up front together with their dependents.
    pub fn start_new_run(&mut self, pre_failed: &[usize]) -> SchedulerStep {
        self.run_counter += 1;
        self.current_run_id = Some(self.run_counter);
        for info in self.tasks.iter_mut() {
            info.run_state = None;
        }
        debug!(run_id = self.run_counter, "scheduler: starting new run");

        let roots: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| self.graph.predecessors_of(i).is_empty())
            .collect();

        let mut newly_failed = Vec::new();
        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        for root in roots {
            manager.mark_task_and_dependents_pending(root);
        }
        for &index in pre_failed {
            if let Some(info) = self.tasks.get_mut(index) {
                if info.run_state != Some(RunState::DoneFailed) {
                    info.run_state = Some(RunState::DoneFailed);
                    newly_failed.push(index);
                }
            }
            let mut manager = StateManager::new(&self.graph, &mut self.tasks);
            newly_failed.extend(manager.mark_dependents_failed(index));
        }

        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        let sweep = manager.collect_new_ready_tasks();
        let run_just_finished = self.maybe_finish_run();

        SchedulerStep {
            newly_scheduled: sweep.scheduled,
            gates_passed: sweep.gates_passed,
            newly_failed,
            run_just_finished,
        }
    }

    /// Record completion of a dispatched task and release what it unblocks.
    pub fn step_completion(&mut self, index: usize, success: bool) -> SchedulerStep {
        if self.current_run_id.is_none() {
            warn!(index, "completion with no active run; ignoring");
            return SchedulerStep::default();
        }

        let mut step = SchedulerStep::default();

        match self.tasks.get_mut(index) {
            Some(info) if info.run_state == Some(RunState::Running) => {
                if success {
                    info.run_state = Some(RunState::DoneSuccess);
                    debug!(task = %info.key, "task completed successfully");
                    let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                    let sweep = manager.collect_new_ready_tasks();
                    step.newly_scheduled = sweep.scheduled;
                    step.gates_passed = sweep.gates_passed;
                } else {
                    info.run_state = Some(RunState::DoneFailed);
                    warn!(task = %info.key, "task failed; failing dependents in this run");
                    step.newly_failed.push(index);
                    let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                    step.newly_failed.extend(manager.mark_dependents_failed(index));
                }
            }
            Some(info) => {
                warn!(task = %info.key, state = ?info.run_state, "completion for a task that is not running; ignoring");
            }
            None => {
                warn!(index, "completion for unknown task; ignoring");
            }
        }

        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// Stop releasing work: every pending task is failed without running.
    /// Running tasks are left to finish.
    pub fn cancel(&mut self) -> SchedulerStep {
        if self.current_run_id.is_none() {
            return SchedulerStep::default();
        }
        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        let newly_failed = manager.cancel_pending();
        info!(cancelled = newly_failed.len(), "scheduler: cancelled pending tasks");
        let run_just_finished = self.maybe_finish_run();
        SchedulerStep {
            newly_failed,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    /// Clear `current_run_id` once every task is terminal.
    ///
    /// Returns `true` if this call transitioned the scheduler to idle.
    fn maybe_finish_run(&mut self) -> bool {
        if self.current_run_id.is_none() {
            return false;
        }

        let manager = StateManager::new(&self.graph, &mut self.tasks);
        if manager.all_tasks_terminal() {
            info!(
                run_id = self.current_run_id,
                "scheduler: all tasks terminal; marking run as finished"
            );
            self.current_run_id = None;
            true
        } else {
            false
        }
    }
}
