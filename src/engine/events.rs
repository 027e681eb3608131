// src/engine/events.rs

//! The event stream delivered to build observers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::dag::task::Task;
use crate::engine::TaskOutcome;
use crate::types::Diagnostic;

/// Aggregate counters. `started + up_to_date <= max` at every emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildProgress {
    pub started: usize,
    pub up_to_date: usize,
    pub completed: usize,
    /// Number of real (non-gate) tasks in the plan.
    pub max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    BuildStarted,
    TargetStarted {
        target: String,
    },
    TaskStarted {
        key: String,
        rule_info: String,
        progress: BuildProgress,
    },
    TaskUpToDate {
        key: String,
        rule_info: String,
        progress: BuildProgress,
    },
    TaskCompleted {
        key: String,
        rule_info: String,
        outcome: TaskOutcome,
        progress: BuildProgress,
    },
    TargetCompleted {
        target: String,
    },
    Diagnostic(Diagnostic),
    BuildCompleted {
        status: BuildStatus,
    },
}

/// Receives the ordered event stream of a build.
pub trait BuildDelegate: Send + Sync {
    fn on_event(&self, event: &BuildEvent);
}

/// Delegate that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelegate;

impl BuildDelegate for NullDelegate {
    fn on_event(&self, _event: &BuildEvent) {}
}

/// Serializes events to the delegate and keeps the progress counters.
///
/// Counters are updated and the event delivered under one lock, so the
/// progress carried by consecutive events never goes backwards.
pub struct EventSink {
    delegate: Arc<dyn BuildDelegate>,
    progress: Mutex<BuildProgress>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("progress", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl EventSink {
    pub fn new(delegate: Arc<dyn BuildDelegate>, max: usize) -> Self {
        Self {
            delegate,
            progress: Mutex::new(BuildProgress {
                max,
                ..BuildProgress::default()
            }),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Fix the task count once the description is known.
    pub fn set_max(&self, max: usize) {
        self.lock().max = max;
    }

    /// Every diagnostic emitted so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, BuildProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> BuildProgress {
        *self.lock()
    }

    pub fn emit(&self, event: BuildEvent) {
        let _guard = self.lock();
        debug!(?event, "build event");
        self.delegate.on_event(&event);
    }

    fn emit_counted(&self, update: impl FnOnce(&mut BuildProgress), make: impl FnOnce(BuildProgress) -> BuildEvent) {
        let mut progress = self.lock();
        update(&mut progress);
        let event = make(*progress);
        debug!(?event, "build event");
        self.delegate.on_event(&event);
    }

    pub fn task_started(&self, task: &Task) {
        self.emit_counted(
            |p| p.started += 1,
            |progress| BuildEvent::TaskStarted {
                key: task.key.clone(),
                rule_info: task.rule_display(),
                progress,
            },
        );
    }

    pub fn task_up_to_date(&self, task: &Task) {
        self.emit_counted(
            |p| p.up_to_date += 1,
            |progress| BuildEvent::TaskUpToDate {
                key: task.key.clone(),
                rule_info: task.rule_display(),
                progress,
            },
        );
    }

    pub fn task_completed(&self, task: &Task, outcome: TaskOutcome) {
        self.emit_counted(
            |p| p.completed += 1,
            |progress| BuildEvent::TaskCompleted {
                key: task.key.clone(),
                rule_info: task.rule_display(),
                outcome,
                progress,
            },
        );
    }

    pub fn diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
        self.emit(BuildEvent::Diagnostic(diagnostic));
    }
}
