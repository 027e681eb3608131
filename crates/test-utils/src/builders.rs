#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use buildplan::config::{ActionConfig, PhaseConfig, ProjectModel, RawProjectFile, TargetConfig, TaskSpec};
use buildplan::errors::Result;

/// Builder for `ProjectModel` to simplify test setup.
pub struct ProjectBuilder {
    raw: RawProjectFile,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawProjectFile::default(),
        }
    }

    pub fn with_target(mut self, target: TargetBuilder) -> Self {
        self.raw.target.insert(target.name, target.config);
        self
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.raw.settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_configuration_setting(mut self, configuration: &str, key: &str, value: &str) -> Self {
        self.raw
            .configurations
            .entry(configuration.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn memory_cache_size(mut self, n: usize) -> Self {
        self.raw.engine.memory_cache_size = n;
        self
    }

    pub fn disk_cache_size(mut self, n: usize) -> Self {
        self.raw.engine.disk_cache_size = n;
        self
    }

    pub fn engine_cache(mut self, enabled: bool) -> Self {
        self.raw.engine.enable_engine_cache = enabled;
        self
    }

    pub fn jobs(mut self, n: usize) -> Self {
        self.raw.engine.jobs = n;
        self
    }

    pub fn output_agnostic(mut self, setting: &str) -> Self {
        self.raw.engine.output_agnostic_settings.push(setting.to_string());
        self
    }

    pub fn toolchain(mut self, identifier: &str) -> Self {
        self.raw.toolchain.identifier = identifier.to_string();
        self
    }

    /// Validate and root the project at `dir`.
    pub fn build_in(self, dir: impl AsRef<Path>) -> Result<ProjectModel> {
        Ok(ProjectModel::try_from(self.raw)?.with_project_dir(dir.as_ref()))
    }
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `[target.<name>]`.
pub struct TargetBuilder {
    name: String,
    config: TargetConfig,
}

impl TargetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: TargetConfig::default(),
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.config.depends_on.push(dep.to_string());
        self
    }

    pub fn setting(mut self, key: &str, value: &str) -> Self {
        self.config.settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn phase(mut self, name: &str, tasks: Vec<TaskSpec>) -> Self {
        self.config.phase.push(PhaseConfig {
            name: name.to_string(),
            task: tasks,
        });
        self
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    /// `rule` is split on whitespace into rule-info tokens.
    pub fn new(rule: &str) -> Self {
        Self {
            spec: TaskSpec {
                rule: rule.split_whitespace().map(str::to_string).collect(),
                tool: None,
                action: ActionConfig::Process,
                command: Vec::new(),
                env: BTreeMap::new(),
                working_directory: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
                exclude: Vec::new(),
                contents: None,
                description: None,
            },
        }
    }

    /// A process task whose command is the rule itself.
    pub fn process(rule: &str) -> Self {
        let builder = Self::new(rule);
        let command = builder.spec.rule.clone();
        builder.command(&command.iter().map(String::as_str).collect::<Vec<_>>())
    }

    pub fn tool(mut self, tool: &str) -> Self {
        self.spec.tool = Some(tool.to_string());
        self
    }

    pub fn action(mut self, action: ActionConfig) -> Self {
        self.spec.action = action;
        self
    }

    pub fn command(mut self, args: &[&str]) -> Self {
        self.spec.command = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn input(mut self, path: &str) -> Self {
        self.spec.inputs.push(path.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.spec.outputs.push(path.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.spec.exclude.push(pattern.to_string());
        self
    }

    pub fn contents(mut self, contents: &str) -> Self {
        self.spec.contents = Some(contents.to_string());
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}
