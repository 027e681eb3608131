// src/dag/task.rs

//! Task graph nodes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::dag::target::ConfiguredTarget;

/// How a declared input or output path is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// A regular file, tracked by content hash.
    File,
    /// A directory tree, tracked by a structural signature.
    DirectoryTree,
    /// An ordering-only node that never exists on disk.
    Virtual,
}

/// A declared input or output of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskNode {
    pub path: PathBuf,
    pub role: NodeRole,
    /// Exclusion globs, relative to `path`, for directory-tree inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
}

impl TaskNode {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: NodeRole::File,
            exclusions: Vec::new(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: NodeRole::DirectoryTree,
            exclusions: Vec::new(),
        }
    }

    pub fn virtual_node(name: impl Into<String>) -> Self {
        Self {
            path: PathBuf::from(format!("<{}>", name.into())),
            role: NodeRole::Virtual,
            exclusions: Vec::new(),
        }
    }

    /// Parse a declared path: `<name>` is virtual, a trailing `/` marks a
    /// directory tree, anything else is a file. Relative paths resolve
    /// against `base`.
    pub fn parse(raw: &str, base: &Path) -> Self {
        if raw.len() > 2 && raw.starts_with('<') && raw.ends_with('>') {
            return Self::virtual_node(&raw[1..raw.len() - 1]);
        }
        let resolved = |p: &str| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        if raw.len() > 1 && raw.ends_with('/') {
            Self::directory(resolved(raw.trim_end_matches('/')))
        } else {
            Self::file(resolved(raw))
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.role == NodeRole::Virtual
    }

    pub fn display(&self) -> String {
        self.path.display().to_string()
    }
}

/// Which boundary a gate marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateKind {
    TargetStart,
    PhaseEnd,
    TargetEnd,
}

/// In-process behaviour of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskAction {
    /// Ordering barrier. Never performs work.
    Gate { gate: GateKind },
    /// Run the command line as an external process.
    Process,
    WriteAuxiliaryFile { contents: String },
    Copy { source: PathBuf, destination: PathBuf },
    MkDir { path: PathBuf },
    /// Touch every output path.
    Touch,
}

/// Discriminant of [`TaskAction`], used for equality and the task action map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Gate,
    Process,
    WriteAuxiliaryFile,
    Copy,
    MkDir,
    Touch,
}

impl TaskAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            TaskAction::Gate { .. } => ActionKind::Gate,
            TaskAction::Process => ActionKind::Process,
            TaskAction::WriteAuxiliaryFile { .. } => ActionKind::WriteAuxiliaryFile,
            TaskAction::Copy { .. } => ActionKind::Copy,
            TaskAction::MkDir { .. } => ActionKind::MkDir,
            TaskAction::Touch => ActionKind::Touch,
        }
    }
}

/// Opaque task type: the gate sentinel or a tool token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Gate,
    Tool(String),
}

/// One node of the execution plan.
#[derive(Debug, Clone)]
pub struct Task {
    /// Manifest command key, unique within a description.
    pub key: String,
    pub rule_info: Vec<String>,
    pub command_line: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: PathBuf,
    pub inputs: Vec<TaskNode>,
    pub outputs: Vec<TaskNode>,
    pub action: TaskAction,
    pub for_target: Option<Arc<ConfiguredTarget>>,
    pub task_type: TaskType,
    pub exec_description: String,
    /// Definition signature: everything that can change produced bytes.
    pub signature: String,
}

impl Task {
    pub fn gate(
        key: impl Into<String>,
        gate: GateKind,
        label: impl Into<String>,
        for_target: Option<Arc<ConfiguredTarget>>,
    ) -> Self {
        let label = label.into();
        let rule_info = vec!["Gate".to_string(), label.clone()];
        let signature = signature_of_gate(&rule_info);
        Self {
            key: key.into(),
            rule_info,
            command_line: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: PathBuf::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            action: TaskAction::Gate { gate },
            for_target,
            task_type: TaskType::Gate,
            exec_description: label,
            signature,
        }
    }

    pub fn is_gate(&self) -> bool {
        self.task_type == TaskType::Gate
    }

    pub fn gate_kind(&self) -> Option<GateKind> {
        match self.action {
            TaskAction::Gate { gate } => Some(gate),
            _ => None,
        }
    }

    pub fn rule_display(&self) -> String {
        self.rule_info.join(" ")
    }

    /// Key under which execution state is recorded. Unlike `key` it does not
    /// depend on the task's position in the plan.
    pub fn state_key(&self) -> String {
        format!("{}:{}", self.target_name().unwrap_or(""), self.rule_display())
    }

    pub fn target_name(&self) -> Option<&str> {
        self.for_target.as_deref().map(ConfiguredTarget::name)
    }

    /// Whether the task rewrites `path` in place (lists it as input and output).
    pub fn mutates(&self, path: &Path) -> bool {
        self.inputs.iter().any(|n| !n.is_virtual() && n.path == path)
            && self.outputs.iter().any(|n| !n.is_virtual() && n.path == path)
    }

    pub fn is_mutator(&self) -> bool {
        self.outputs.iter().any(|o| !o.is_virtual() && self.mutates(&o.path))
    }

    /// Non-gate tasks with no outputs run on every build.
    pub fn always_out_of_date(&self) -> bool {
        !self.is_gate() && self.outputs.is_empty()
    }

    /// Whether `input` can be changed by this task's own execution: the same
    /// path is an output, or an output lands inside the input directory.
    pub fn writes_into(&self, input: &TaskNode) -> bool {
        match input.role {
            NodeRole::Virtual => false,
            NodeRole::File => self.mutates(&input.path),
            NodeRole::DirectoryTree => self
                .outputs
                .iter()
                .any(|o| !o.is_virtual() && o.path.starts_with(&input.path)),
        }
    }
}

/// Equality over the identity-relevant fields.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.rule_info == other.rule_info
            && self.command_line == other.command_line
            && self.environment == other.environment
            && self.action.kind() == other.action.kind()
            && self.for_target == other.for_target
            && self.task_type == other.task_type
    }
}

impl Eq for Task {}

/// Fields hashed into a task's definition signature.
///
/// Callers pass values with output-agnostic settings already blanked.
pub struct SignatureInput<'a> {
    pub rule_info: &'a [String],
    pub command_line: &'a [String],
    pub environment: &'a BTreeMap<String, String>,
    pub working_directory: &'a Path,
    pub inputs: &'a [TaskNode],
    pub outputs: &'a [TaskNode],
    pub action: &'a TaskAction,
    pub task_type: &'a TaskType,
}

pub fn compute_task_signature(input: &SignatureInput<'_>) -> String {
    let mut hasher = Hasher::new();
    let mut field = |tag: &str, value: &str| {
        hasher.update(tag.as_bytes());
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    };

    for token in input.rule_info {
        field("rule", token);
    }
    for token in input.command_line {
        field("arg", token);
    }
    for (k, v) in input.environment {
        field("env-key", k);
        field("env-value", v);
    }
    field("cwd", &input.working_directory.to_string_lossy());
    for node in input.inputs {
        field("input", &node_descriptor(node));
    }
    for node in input.outputs {
        field("output", &node_descriptor(node));
    }
    match input.action {
        TaskAction::WriteAuxiliaryFile { contents } => field("contents", contents),
        TaskAction::Copy {
            source,
            destination,
        } => {
            field("copy-from", &source.to_string_lossy());
            field("copy-to", &destination.to_string_lossy());
        }
        TaskAction::MkDir { path } => field("mkdir", &path.to_string_lossy()),
        _ => {}
    }
    field("action", &format!("{:?}", input.action.kind()));
    match input.task_type {
        TaskType::Gate => field("type", "gate"),
        TaskType::Tool(tool) => field("type", tool),
    }
    hasher.finalize().to_hex().to_string()
}

fn node_descriptor(node: &TaskNode) -> String {
    let mut s = format!("{:?}:{}", node.role, node.path.display());
    for pattern in &node.exclusions {
        s.push('|');
        s.push_str(pattern);
    }
    s
}

fn signature_of_gate(rule_info: &[String]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(b"gate");
    for token in rule_info {
        hasher.update(token.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_task(rule: &[&str], args: &[&str]) -> Task {
        Task {
            key: "P0:App:x".to_string(),
            rule_info: rule.iter().map(|s| s.to_string()).collect(),
            command_line: args.iter().map(|s| s.to_string()).collect(),
            environment: BTreeMap::new(),
            working_directory: PathBuf::from("/proj"),
            inputs: vec![TaskNode::file("/proj/main.c")],
            outputs: vec![TaskNode::file("/proj/build/main.o")],
            action: TaskAction::Process,
            for_target: None,
            task_type: TaskType::Tool("cc".to_string()),
            exec_description: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn parse_recognises_roles() {
        let base = Path::new("/proj");
        assert_eq!(TaskNode::parse("<sign>", base).role, NodeRole::Virtual);
        let dir = TaskNode::parse("App.app/", base);
        assert_eq!(dir.role, NodeRole::DirectoryTree);
        assert_eq!(dir.path, PathBuf::from("/proj/App.app"));
        assert_eq!(TaskNode::parse("/abs/file", base).path, PathBuf::from("/abs/file"));
    }

    #[test]
    fn equality_ignores_description_and_paths() {
        let a = process_task(&["CompileC", "main.o"], &["cc", "-c"]);
        let mut b = a.clone();
        b.exec_description = "different".to_string();
        b.key = "P7:Other:y".to_string();
        assert_eq!(a, b);

        let mut c = a.clone();
        c.command_line.push("-O2".to_string());
        assert_ne!(a, c);

        let mut d = a.clone();
        d.task_type = TaskType::Tool("clang".to_string());
        assert_ne!(a, d);
    }

    #[test]
    fn mutator_detection() {
        let mut sign = process_task(&["CodeSign", "App"], &["codesign"]);
        sign.inputs = vec![TaskNode::file("/b/App"), TaskNode::directory("/b")];
        sign.outputs = vec![TaskNode::file("/b/App"), TaskNode::file("/b/_CodeSignature/CodeResources")];
        assert!(sign.is_mutator());
        assert!(sign.writes_into(&TaskNode::directory("/b")));
        assert!(!sign.writes_into(&TaskNode::file("/elsewhere")));
    }

    #[test]
    fn gates_are_not_always_out_of_date() {
        let gate = Task::gate("G0", GateKind::TargetStart, "App-start", None);
        assert!(gate.is_gate());
        assert!(!gate.always_out_of_date());
        let mut t = process_task(&["Script"], &["sh"]);
        t.outputs.clear();
        assert!(t.always_out_of_date());
    }
}
