// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work
//! itself. This makes it easy to swap in a scripted executor in tests while
//! keeping the production implementation here.
//!
//! - `TaskExecutorBackend` is the default implementation used by
//!   `buildplan`. It spawns one Tokio task per scheduled task, runs it
//!   through the shared [`TaskRunner`] and reports the outcome back to the
//!   runtime.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskFinished` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::task_runner::TaskRunner;

/// Trait abstracting how scheduled tasks are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// Each dispatched task must eventually produce exactly one
    /// `RuntimeEvent::TaskFinished`.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend used in production.
#[derive(Debug)]
pub struct TaskExecutorBackend {
    runner: Arc<TaskRunner>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl TaskExecutorBackend {
    pub fn new(runner: Arc<TaskRunner>, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { runner, runtime_tx }
    }
}

impl ExecutorBackend for TaskExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for task in tasks {
                let runner = Arc::clone(&self.runner);
                let tx = self.runtime_tx.clone();
                tokio::spawn(async move {
                    let outcome = runner.run(task.index).await;
                    let event = RuntimeEvent::TaskFinished {
                        index: task.index,
                        outcome,
                    };
                    if tx.send(event).await.is_err() {
                        error!(task = %task.key, "runtime gone before task completion was reported");
                    }
                });
            }
            Ok(())
        })
    }
}
