// src/description/mod.rs

//! Build descriptions: the immutable, signature-keyed execution plan.
//!
//! - [`settings`] resolves per-target settings and expands `$(NAME)` macros.
//! - [`signature`] hashes a request into the description signature.
//! - [`builder`] turns a project model plus request into a description.
//! - [`artifacts`] persists and restores the three on-disk artifacts.

pub mod artifacts;
pub mod builder;
pub mod settings;
pub mod signature;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blake3::Hasher;

use crate::dag::graph::TaskGraph;
use crate::dag::target::ConfiguredTarget;
use crate::dag::task::{ActionKind, NodeRole, Task, TaskType};
use crate::types::{Diagnostic, DescriptionSource};

pub use artifacts::ArtifactPaths;
pub use builder::{BuildPlan, DescriptionBuilder, PlannedTarget};

/// An immutable execution plan, identified solely by its signature.
#[derive(Debug)]
pub struct BuildDescription {
    pub signature: String,
    /// Tasks in plan order; graph indices refer to positions here.
    pub tasks: Vec<Arc<Task>>,
    pub graph: TaskGraph,
    /// One shared instance per configured target.
    pub targets: Vec<Arc<ConfiguredTarget>>,
    /// Target name to the names of targets it waits on.
    pub target_dependencies: BTreeMap<String, Vec<String>>,
    /// Tool-type token to action kind.
    pub task_action_map: BTreeMap<String, ActionKind>,
    /// Copy destination to copy source, for display.
    pub copied_path_map: BTreeMap<PathBuf, PathBuf>,
    /// Construction diagnostics (errors and advisories).
    pub diagnostics: Vec<Diagnostic>,
    /// Targets whose construction failed; their tasks never run.
    pub failed_targets: BTreeSet<String>,
    /// Mutation stamp per directory-tree input path.
    pub directory_stamps: BTreeMap<PathBuf, String>,
    pub artifacts: ArtifactPaths,
}

impl BuildDescription {
    /// Number of real (non-gate) tasks.
    pub fn max_task_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_gate()).count()
    }

    pub fn task_by_key(&self, key: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// First task whose rule info joins to `rule`.
    pub fn task_by_rule(&self, rule: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|t| t.rule_display() == rule)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Tasks that must be failed before the run starts.
    pub fn pre_failed_tasks(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.target_name()
                    .is_some_and(|name| self.failed_targets.contains(name))
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn directory_stamp(&self, path: &Path) -> Option<&str> {
        self.directory_stamps.get(path).map(String::as_str)
    }
}

/// A description handed out by the builder, with its provenance.
#[derive(Debug, Clone)]
pub struct RestoredDescription {
    pub description: Arc<BuildDescription>,
    pub source: DescriptionSource,
}

/// Stamp every directory-tree input with the definition signatures of the
/// tasks writing into it, so that a change to any cooperating writer shows
/// up in the directory's signature even when the bytes happen to match.
pub(crate) fn compute_directory_stamps(tasks: &[Arc<Task>]) -> BTreeMap<PathBuf, String> {
    let dirs: BTreeSet<&Path> = tasks
        .iter()
        .flat_map(|t| t.inputs.iter())
        .filter(|n| n.role == NodeRole::DirectoryTree)
        .map(|n| n.path.as_path())
        .collect();

    dirs.into_iter()
        .map(|dir| {
            let mut writers: Vec<&str> = tasks
                .iter()
                .filter(|t| {
                    t.outputs
                        .iter()
                        .any(|o| !o.is_virtual() && o.path.starts_with(dir))
                })
                .map(|t| t.signature.as_str())
                .collect();
            writers.sort_unstable();
            let mut hasher = Hasher::new();
            for sig in writers {
                hasher.update(sig.as_bytes());
            }
            (dir.to_path_buf(), hasher.finalize().to_hex().to_string())
        })
        .collect()
}

/// Tool-type token to action kind for every non-gate task.
pub(crate) fn compute_task_action_map(tasks: &[Arc<Task>]) -> BTreeMap<String, ActionKind> {
    tasks
        .iter()
        .filter_map(|t| match &t.task_type {
            TaskType::Tool(tool) => Some((tool.clone(), t.action.kind())),
            TaskType::Gate => None,
        })
        .collect()
}
