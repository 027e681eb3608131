// src/exec/task_runner.rs

//! Runs one scheduled task: decide, execute if stale, record, report.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::dag::task::{Task, TaskAction};
use crate::description::BuildDescription;
use crate::engine::events::EventSink;
use crate::engine::TaskOutcome;
use crate::errors::BuildError;
use crate::exec::actions;
use crate::exec::process::{ProcessExecutor, ProcessRequest};
use crate::fs::FileSystem;
use crate::incremental::{Decision, DecisionEngine};
use crate::types::Diagnostic;

/// Keys of the tasks a build executed and found up to date.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionLog {
    pub executed: Vec<String>,
    pub up_to_date: Vec<String>,
}

/// Shared by every spawned task of one build.
#[derive(Debug)]
pub struct TaskRunner {
    fs: Arc<dyn FileSystem>,
    description: Arc<BuildDescription>,
    decisions: Arc<DecisionEngine>,
    executor: Arc<dyn ProcessExecutor>,
    sink: Arc<EventSink>,
    dry_run: bool,
    log: Mutex<ExecutionLog>,
}

impl TaskRunner {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        description: Arc<BuildDescription>,
        decisions: Arc<DecisionEngine>,
        executor: Arc<dyn ProcessExecutor>,
        sink: Arc<EventSink>,
        dry_run: bool,
    ) -> Self {
        Self {
            fs,
            description,
            decisions,
            executor,
            sink,
            dry_run,
            log: Mutex::new(ExecutionLog::default()),
        }
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn note(&self, f: impl FnOnce(&mut ExecutionLog)) {
        f(&mut self.log.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Run the task at `index` and return its outcome for the scheduler.
    ///
    /// Every observer-visible start is paired with a completion, including
    /// when the task fails before its command runs.
    pub async fn run(&self, index: usize) -> TaskOutcome {
        let Some(task) = self.description.tasks.get(index).cloned() else {
            error!(index, "scheduled task index out of range");
            return TaskOutcome::Failed(format!("unknown task index {index}"));
        };

        let decision = match self.decisions.decide(&task) {
            Ok(decision) => decision,
            Err(err) => return self.fail_before_run(&task, err),
        };

        if !decision.verdict.needs_run() {
            debug!(task = %task.rule_display(), "up to date");
            self.note(|log| log.up_to_date.push(task.key.clone()));
            self.sink.task_up_to_date(&task);
            return TaskOutcome::UpToDate;
        }

        info!(task = %task.rule_display(), reason = %decision.verdict, dry_run = self.dry_run, "running task");
        self.decisions.mark_ran(&task);
        self.sink.task_started(&task);
        self.note(|log| log.executed.push(task.key.clone()));

        let outcome = if self.dry_run {
            TaskOutcome::Success
        } else {
            self.execute(&task, &decision).await
        };
        self.sink.task_completed(&task, outcome.clone());
        outcome
    }

    fn fail_before_run(&self, task: &Task, err: BuildError) -> TaskOutcome {
        warn!(task = %task.rule_display(), error = %err, "task cannot run");
        self.sink.task_started(task);
        let mut diagnostic = Diagnostic::error(err.to_string()).for_task(task.rule_display());
        if let Some(target) = task.target_name() {
            diagnostic = diagnostic.for_target(target);
        }
        self.sink.diagnostic(diagnostic);
        self.decisions.record_failure(task);
        let outcome = TaskOutcome::Failed(err.to_string());
        self.sink.task_completed(task, outcome.clone());
        outcome
    }

    async fn execute(&self, task: &Task, decision: &Decision) -> TaskOutcome {
        let result = match &task.action {
            TaskAction::Process => {
                let request = ProcessRequest::from_task(task);
                match self.executor.execute(&request).await {
                    Ok(output) if output.success => Ok(()),
                    Ok(output) => Err(match output.exit_code {
                        Some(code) => format!("exited with status {code}"),
                        None => "terminated by signal".to_string(),
                    }),
                    Err(err) => Err(format!("{err:#}")),
                }
            }
            TaskAction::Gate { .. } => Ok(()),
            _ => actions::perform(self.fs.as_ref(), task).map_err(|e| format!("{e:#}")),
        };
        self.decisions.invalidate_outputs(task);

        let result = result.and_then(|()| {
            self.decisions
                .record_success(task, decision)
                .map_err(|e| format!("recording results: {e}"))
        });

        match result {
            Ok(()) => TaskOutcome::Success,
            Err(reason) => {
                warn!(task = %task.rule_display(), %reason, "task failed");
                self.decisions.record_failure(task);
                let mut diagnostic =
                    Diagnostic::error(format!("task '{}' failed: {reason}", task.rule_display()))
                        .for_task(task.rule_display());
                if let Some(target) = task.target_name() {
                    diagnostic = diagnostic.for_target(target);
                }
                self.sink.diagnostic(diagnostic);
                TaskOutcome::Failed(reason)
            }
        }
    }
}
