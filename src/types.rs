use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which targets a build request pulls in.
///
/// - `Workspace`: the requested targets plus everything they (transitively)
///   depend on (default).
/// - `TargetsOnly`: only the requested targets. Dependency edges between them
///   are still honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyScope {
    #[default]
    Workspace,
    TargetsOnly,
}

/// Configuration name plus command-line overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildParameters {
    pub configuration: String,
    pub overrides: BTreeMap<String, String>,
}

impl BuildParameters {
    pub fn new(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// A request to build a set of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub targets: Vec<String>,
    pub parameters: BuildParameters,
    /// Active run destination, part of the description signature.
    pub destination: Option<String>,
    pub dependency_scope: DependencyScope,
    pub continue_building_after_errors: bool,
    pub use_parallel_targets: bool,
    pub use_implicit_dependencies: bool,
    pub use_dry_run: bool,
}

impl BuildRequest {
    pub fn new<I, S>(targets: I, parameters: BuildParameters) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            parameters,
            destination: None,
            dependency_scope: DependencyScope::Workspace,
            continue_building_after_errors: false,
            use_parallel_targets: true,
            use_implicit_dependencies: false,
            use_dry_run: false,
        }
    }
}

/// Where the build description used by a build came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptionSource {
    New,
    InMemoryCache,
    OnDiskCache,
}

impl fmt::Display for DescriptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DescriptionSource::New => "new",
            DescriptionSource::InMemoryCache => "in-memory cache",
            DescriptionSource::OnDiskCache => "on-disk cache",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A user-facing diagnostic, attributed to a target or a task when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            target: None,
            task: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            target: None,
            task: None,
        }
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn for_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(f, "{label}: {}", self.message)
    }
}
