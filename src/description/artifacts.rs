// src/description/artifacts.rs

//! The three persisted artifacts of a build description.
//!
//! Layout under the cache root:
//!
//! ```text
//! <cache_root>/<signature>/manifest.json
//! <cache_root>/<signature>/package.json
//! <cache_root>/<signature>/description.json
//! ```
//!
//! Entries are staged in `<cache_root>/.staging-<signature>-<nonce>/` and
//! published with a single directory rename, so a reader never sees a
//! partially written entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::graph::TaskGraph;
use crate::dag::target::TargetRegistry;
use crate::dag::task::{ActionKind, NodeRole, Task, TaskAction, TaskNode, TaskType};
use crate::description::signature::DESCRIPTION_FORMAT_VERSION;
use crate::description::{compute_directory_stamps, BuildDescription};
use crate::errors::{BuildError, Result};
use crate::fs::FileSystem;
use crate::types::Diagnostic;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PACKAGE_FILE: &str = "package.json";
pub const DESCRIPTION_FILE: &str = "description.json";
const STAGING_PREFIX: &str = ".staging-";

static STAGING_NONCE: AtomicU64 = AtomicU64::new(0);

/// Locations of one description's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub manifest: PathBuf,
    pub package: PathBuf,
    pub description: PathBuf,
}

impl ArtifactPaths {
    pub fn new(cache_root: &Path, signature: &str) -> Self {
        let dir = cache_root.join(signature);
        Self {
            manifest: dir.join(MANIFEST_FILE),
            package: dir.join(PACKAGE_FILE),
            description: dir.join(DESCRIPTION_FILE),
            dir,
        }
    }
}

/// Whether a cache-root entry is a staging directory rather than an entry.
pub fn is_staging_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(STAGING_PREFIX))
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestClient {
    name: String,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ManifestCommand {
    tool: String,
    description: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_directory: String,
    signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    client: ManifestClient,
    signature: String,
    commands: BTreeMap<String, ManifestCommand>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PackageTarget {
    name: String,
    parameters: String,
    dependencies: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Package {
    version: u32,
    signature: String,
    targets: Vec<PackageTarget>,
    task_action_map: BTreeMap<String, ActionKind>,
    copied_path_map: BTreeMap<PathBuf, PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SerializedTarget {
    name: String,
    parameters: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SerializedTask {
    key: String,
    rule_info: Vec<String>,
    command_line: Vec<String>,
    environment: BTreeMap<String, String>,
    working_directory: PathBuf,
    inputs: Vec<TaskNode>,
    outputs: Vec<TaskNode>,
    action: TaskAction,
    /// Index into the serialized target table.
    target: Option<usize>,
    #[serde(rename = "type")]
    task_type: TaskType,
    exec_description: String,
    signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SerializedDescription {
    version: u32,
    signature: String,
    targets: Vec<SerializedTarget>,
    tasks: Vec<SerializedTask>,
    /// Predecessor lists, indexed like `tasks`.
    predecessors: Vec<Vec<usize>>,
    diagnostics: Vec<Diagnostic>,
}

fn node_strings(nodes: &[TaskNode]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| match n.role {
            NodeRole::DirectoryTree => format!("{}/", n.path.display()),
            _ => n.display(),
        })
        .collect()
}

fn manifest_of(desc: &BuildDescription) -> Manifest {
    let commands = desc
        .tasks
        .iter()
        .map(|t| {
            let tool = match &t.task_type {
                TaskType::Gate => "gate".to_string(),
                TaskType::Tool(tool) => tool.clone(),
            };
            let command = ManifestCommand {
                tool,
                description: t.exec_description.clone(),
                inputs: node_strings(&t.inputs),
                outputs: node_strings(&t.outputs),
                args: t.command_line.clone(),
                env: t.environment.clone(),
                working_directory: t.working_directory.display().to_string(),
                signature: t.signature.clone(),
            };
            (t.key.clone(), command)
        })
        .collect();
    Manifest {
        client: ManifestClient {
            name: "buildplan".to_string(),
            version: DESCRIPTION_FORMAT_VERSION,
        },
        signature: desc.signature.clone(),
        commands,
    }
}

fn package_of(desc: &BuildDescription) -> Package {
    let targets = desc
        .targets
        .iter()
        .map(|t| PackageTarget {
            name: t.target.clone(),
            parameters: t.parameters.clone(),
            dependencies: desc
                .target_dependencies
                .get(&t.target)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();
    Package {
        version: DESCRIPTION_FORMAT_VERSION,
        signature: desc.signature.clone(),
        targets,
        task_action_map: desc.task_action_map.clone(),
        copied_path_map: desc.copied_path_map.clone(),
    }
}

fn serialized_of(desc: &BuildDescription) -> SerializedDescription {
    let tasks = desc
        .tasks
        .iter()
        .map(|t| SerializedTask {
            key: t.key.clone(),
            rule_info: t.rule_info.clone(),
            command_line: t.command_line.clone(),
            environment: t.environment.clone(),
            working_directory: t.working_directory.clone(),
            inputs: t.inputs.clone(),
            outputs: t.outputs.clone(),
            action: t.action.clone(),
            target: t
                .for_target
                .as_ref()
                .and_then(|ct| desc.targets.iter().position(|x| Arc::ptr_eq(x, ct))),
            task_type: t.task_type.clone(),
            exec_description: t.exec_description.clone(),
            signature: t.signature.clone(),
        })
        .collect();
    SerializedDescription {
        version: DESCRIPTION_FORMAT_VERSION,
        signature: desc.signature.clone(),
        targets: desc
            .targets
            .iter()
            .map(|t| SerializedTarget {
                name: t.target.clone(),
                parameters: t.parameters.clone(),
            })
            .collect(),
        tasks,
        predecessors: (0..desc.graph.len())
            .map(|i| desc.graph.predecessors_of(i).to_vec())
            .collect(),
        diagnostics: desc.diagnostics.clone(),
    }
}

/// Serialize the three artifacts. Output is byte-identical for equal
/// descriptions.
pub fn encode(desc: &BuildDescription) -> Result<[Vec<u8>; 3]> {
    Ok([
        serde_json::to_vec_pretty(&manifest_of(desc))?,
        serde_json::to_vec_pretty(&package_of(desc))?,
        serde_json::to_vec_pretty(&serialized_of(desc))?,
    ])
}

/// Write the artifacts of `desc` into its signature directory.
///
/// Returns `false` when an entry for the signature was already published;
/// published entries are immutable and left untouched.
pub fn publish(fs: &dyn FileSystem, desc: &BuildDescription) -> Result<bool> {
    let paths = &desc.artifacts;
    if fs.is_dir(&paths.dir) {
        return Ok(false);
    }
    let root = paths
        .dir
        .parent()
        .ok_or_else(|| BuildError::ConfigError(format!("cache entry {:?} has no parent", paths.dir)))?;

    let nonce = STAGING_NONCE.fetch_add(1, Ordering::SeqCst);
    let staging = root.join(format!(
        "{STAGING_PREFIX}{}-{}-{nonce}",
        desc.signature,
        std::process::id()
    ));
    let [manifest, package, blob] = encode(desc)?;

    let staged = (|| -> anyhow::Result<()> {
        fs.create_dir_all(&staging)?;
        fs.write(&staging.join(DESCRIPTION_FILE), &blob)?;
        fs.write(&staging.join(PACKAGE_FILE), &package)?;
        fs.write(&staging.join(MANIFEST_FILE), &manifest)?;
        fs.rename(&staging, &paths.dir)?;
        Ok(())
    })();

    if let Err(err) = staged {
        let _ = fs.remove_dir_all(&staging);
        if fs.is_dir(&paths.dir) {
            debug!(signature = %desc.signature, "entry published concurrently");
            return Ok(false);
        }
        return Err(err.into());
    }
    debug!(signature = %desc.signature, dir = ?paths.dir, "published build description");
    Ok(true)
}

/// Restore a description from its signature directory.
///
/// Any missing file, parse failure or disagreement between the three files
/// yields [`BuildError::CacheCorruption`].
pub fn restore(fs: &dyn FileSystem, cache_root: &Path, signature: &str) -> Result<BuildDescription> {
    let paths = ArtifactPaths::new(cache_root, signature);
    let read = |path: &Path, what: &str| -> Result<Vec<u8>> {
        fs.read(path)
            .map_err(|e| BuildError::corruption(signature, format!("{what}: {e}")))
    };
    let parse_err = |what: &str, e: serde_json::Error| {
        BuildError::corruption(signature, format!("{what}: {e}"))
    };

    let manifest: Manifest = serde_json::from_slice(&read(&paths.manifest, MANIFEST_FILE)?)
        .map_err(|e| parse_err(MANIFEST_FILE, e))?;
    let package: Package = serde_json::from_slice(&read(&paths.package, PACKAGE_FILE)?)
        .map_err(|e| parse_err(PACKAGE_FILE, e))?;
    let blob: SerializedDescription =
        serde_json::from_slice(&read(&paths.description, DESCRIPTION_FILE)?)
            .map_err(|e| parse_err(DESCRIPTION_FILE, e))?;

    if manifest.signature != signature || package.signature != signature || blob.signature != signature {
        return Err(BuildError::corruption(signature, "artifact signatures disagree"));
    }
    if package.version != DESCRIPTION_FORMAT_VERSION || blob.version != DESCRIPTION_FORMAT_VERSION {
        return Err(BuildError::corruption(signature, "unsupported format version"));
    }
    if blob.predecessors.len() != blob.tasks.len() || manifest.commands.len() != blob.tasks.len() {
        return Err(BuildError::corruption(signature, "task tables disagree"));
    }

    let mut registry = TargetRegistry::new();
    let table: Vec<_> = blob
        .targets
        .iter()
        .map(|t| registry.intern(&t.name, &t.parameters))
        .collect();

    let mut tasks = Vec::with_capacity(blob.tasks.len());
    for t in blob.tasks {
        if !manifest.commands.contains_key(&t.key) {
            return Err(BuildError::corruption(
                signature,
                format!("task '{}' missing from manifest", t.key),
            ));
        }
        let for_target = match t.target {
            Some(i) => Some(Arc::clone(table.get(i).ok_or_else(|| {
                BuildError::corruption(signature, format!("task '{}' references unknown target {i}", t.key))
            })?)),
            None => None,
        };
        tasks.push(Arc::new(Task {
            key: t.key,
            rule_info: t.rule_info,
            command_line: t.command_line,
            environment: t.environment,
            working_directory: t.working_directory,
            inputs: t.inputs,
            outputs: t.outputs,
            action: t.action,
            for_target,
            task_type: t.task_type,
            exec_description: t.exec_description,
            signature: t.signature,
        }));
    }

    let edges = blob
        .predecessors
        .iter()
        .enumerate()
        .flat_map(|(to, preds)| preds.iter().map(move |&from| (from, to)));
    let graph = TaskGraph::new(tasks.len(), edges)
        .map_err(|e| BuildError::corruption(signature, e.to_string()))?;

    let target_dependencies = package
        .targets
        .into_iter()
        .map(|t| (t.name, t.dependencies))
        .collect();

    Ok(BuildDescription {
        signature: signature.to_string(),
        directory_stamps: compute_directory_stamps(&tasks),
        tasks,
        graph,
        targets: registry.into_targets(),
        target_dependencies,
        task_action_map: package.task_action_map,
        copied_path_map: package.copied_path_map,
        diagnostics: blob.diagnostics,
        failed_targets: Default::default(),
        artifacts: paths,
    })
}
