// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CacheSettings;

/// Project model as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// disk_cache_size = 2
///
/// [settings]
/// OTHER_CFLAGS = "-O0"
///
/// [target.App]
/// depends_on = ["Lib"]
///
/// [[target.App.phase]]
/// name = "sources"
///
/// [[target.App.phase.task]]
/// rule = ["CompileC", "main.o"]
/// command = ["cc", "-c", "main.c", "-o", "$(BUILD_DIR)/main.o"]
/// inputs = ["main.c"]
/// outputs = ["$(BUILD_DIR)/main.o"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProjectFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub toolchain: ToolchainSection,

    /// Project-level settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Per-configuration project settings, keyed by configuration name.
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,

    /// All targets from `[target.<name>]`.
    #[serde(default)]
    pub target: BTreeMap<String, TargetConfig>,
}

/// Validated project model.
///
/// Construct via `ProjectModel::try_from(raw)`; the loader additionally
/// records the directory the project file lives in.
#[derive(Debug, Clone)]
pub struct ProjectModel {
    pub engine: EngineSection,
    pub toolchain: ToolchainSection,
    pub settings: BTreeMap<String, String>,
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
    pub target: BTreeMap<String, TargetConfig>,
    pub project_dir: PathBuf,
}

impl ProjectModel {
    pub(crate) fn new_unchecked(raw: RawProjectFile) -> Self {
        Self {
            engine: raw.engine,
            toolchain: raw.toolchain,
            settings: raw.settings,
            configurations: raw.configurations,
            target: raw.target,
            project_dir: PathBuf::from("."),
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Build output tree, resolved against the project directory.
    pub fn build_root(&self) -> PathBuf {
        resolve(&self.project_dir, &self.engine.build_root)
    }

    /// Location of the incremental build state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.build_root().join("buildplan.db")
    }

    pub fn cache_settings(&self) -> CacheSettings {
        let cache_root = self
            .engine
            .cache_root
            .as_ref()
            .map(|root| resolve(&self.project_dir, root));
        CacheSettings {
            memory_capacity: self.engine.memory_cache_size,
            disk_capacity: self.engine.disk_cache_size,
            enable_memory: self.engine.enable_memory_cache,
            enable_disk: self.engine.enable_disk_cache,
            enable_engine_cache: self.engine.enable_engine_cache,
            cache_root,
        }
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// `[engine]` section: caches, build tree and worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Capacity of the in-memory description tier (0 disables it).
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,

    /// Capacity of the on-disk description tier (0 disables it).
    #[serde(default = "default_disk_cache_size")]
    pub disk_cache_size: usize,

    #[serde(default = "default_true")]
    pub enable_memory_cache: bool,

    #[serde(default = "default_true")]
    pub enable_disk_cache: bool,

    /// Reuse the live execution session across builds of the same manifest.
    #[serde(default = "default_true")]
    pub enable_engine_cache: bool,

    /// Override for the on-disk description cache root.
    ///
    /// Defaults to `<build_root>/BuildDescriptions`.
    #[serde(default)]
    pub cache_root: Option<String>,

    #[serde(default = "default_build_root")]
    pub build_root: String,

    /// Worker pool size; 0 means the available parallelism.
    #[serde(default)]
    pub jobs: usize,

    /// Extra setting names that never influence produced bytes.
    #[serde(default)]
    pub output_agnostic_settings: Vec<String>,
}

fn default_memory_cache_size() -> usize {
    4
}

fn default_disk_cache_size() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_build_root() -> String {
    "build".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            memory_cache_size: default_memory_cache_size(),
            disk_cache_size: default_disk_cache_size(),
            enable_memory_cache: true,
            enable_disk_cache: true,
            enable_engine_cache: true,
            cache_root: None,
            build_root: default_build_root(),
            jobs: 0,
            output_agnostic_settings: Vec::new(),
        }
    }
}

/// `[toolchain]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolchainSection {
    #[serde(default = "default_toolchain")]
    pub identifier: String,
}

fn default_toolchain() -> String {
    "default".to_string()
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            identifier: default_toolchain(),
        }
    }
}

/// `[target.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetConfig {
    /// Targets that must finish before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Build phases in declaration order. Phases run sequentially.
    #[serde(default)]
    pub phase: Vec<PhaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,

    #[serde(default)]
    pub task: Vec<TaskSpec>,
}

/// In-process behaviour of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActionConfig {
    /// Run `command` as an external process.
    #[default]
    Process,
    /// Write `contents` to the single output.
    WriteFile,
    /// Copy the single input to the single output.
    Copy,
    /// Create the single output directory.
    Mkdir,
    /// Update the mtime of every output, creating missing files.
    Touch,
}

impl ActionConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionConfig::Process => "process",
            ActionConfig::WriteFile => "write-file",
            ActionConfig::Copy => "copy",
            ActionConfig::Mkdir => "mkdir",
            ActionConfig::Touch => "touch",
        }
    }
}

/// `[[target.<name>.phase.task]]` entry: one resolved task declaration.
///
/// Paths ending in `/` denote directory trees; paths written as `<name>`
/// are virtual nodes that only carry ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Rule info: stable identity and display key.
    pub rule: Vec<String>,

    /// Opaque tool-type token. Defaults to the action name.
    #[serde(default)]
    pub tool: Option<String>,

    #[serde(default)]
    pub action: ActionConfig,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    /// Exclusion globs applied to directory-tree inputs.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Contents for `write-file` tasks.
    #[serde(default)]
    pub contents: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl TaskSpec {
    pub fn rule_display(&self) -> String {
        self.rule.join(" ")
    }

    pub fn tool_token(&self) -> String {
        self.tool
            .clone()
            .unwrap_or_else(|| self.action.as_str().to_string())
    }
}
