// src/engine/runtime.rs

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::task::GateKind;
use crate::dag::ScheduledTask;
use crate::description::BuildDescription;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::events::{BuildEvent, EventSink};
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s,
/// and delegates actual task execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching tasks to the executor and reporting target
/// boundaries to observers.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    description: Arc<BuildDescription>,
    sink: Arc<EventSink>,
    /// Targets whose start gate passed and whose completion is not reported yet.
    open_targets: BTreeSet<String>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("open_targets", &self.open_targets)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        description: Arc<BuildDescription>,
        sink: Arc<EventSink>,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            description,
            sink,
            open_targets: BTreeSet::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run, failing `pre_failed` tasks up front.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core (dispatch tasks, report gates).
    ///
    /// Returns the core so the caller can take back its scheduler.
    pub async fn run(mut self, pre_failed: &[usize]) -> Result<CoreRuntime> {
        info!(signature = %self.description.signature, "buildplan runtime started");

        let step = self.core.start(pre_failed);
        let mut keep_running = self.execute_step(step).await?;

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed before the run finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event);
            keep_running = self.execute_step(step).await?;
        }

        // Targets cut short by a closed channel still get their completion.
        for target in std::mem::take(&mut self.open_targets) {
            self.sink.emit(BuildEvent::TargetCompleted { target });
        }

        info!(status = %self.core.status(), "runtime exiting");
        Ok(self.core)
    }

    async fn execute_step(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::GatesPassed(gates) => {
                for index in gates {
                    self.gate_passed(index);
                }
            }
            CoreCommand::TasksFailed(indices) => {
                for index in indices {
                    self.close_target_if_end_gate(index);
                }
            }
            CoreCommand::Finished => {
                debug!("core reported the run finished");
            }
        }
        Ok(())
    }

    fn gate_passed(&mut self, index: usize) {
        let Some(task) = self.description.tasks.get(index) else {
            return;
        };
        let Some(target) = task.target_name() else {
            return;
        };
        match task.gate_kind() {
            Some(GateKind::TargetStart) => {
                self.open_targets.insert(target.to_string());
                self.sink.emit(BuildEvent::TargetStarted {
                    target: target.to_string(),
                });
            }
            Some(GateKind::TargetEnd) => self.close_target_if_end_gate(index),
            Some(GateKind::PhaseEnd) => debug!(gate = %task.rule_display(), "phase finished"),
            None => {}
        }
    }

    fn close_target_if_end_gate(&mut self, index: usize) {
        let Some(task) = self.description.tasks.get(index) else {
            return;
        };
        if task.gate_kind() != Some(GateKind::TargetEnd) {
            return;
        }
        if let Some(target) = task.target_name() {
            if self.open_targets.remove(target) {
                self.sink.emit(BuildEvent::TargetCompleted {
                    target: target.to_string(),
                });
            }
        }
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let keys: Vec<_> = tasks.iter().map(|t| t.key.as_str()).collect();
        debug!(?keys, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}
