// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ActionConfig, ProjectModel, RawProjectFile, TaskSpec};
use crate::errors::{BuildError, Result};

impl TryFrom<RawProjectFile> for ProjectModel {
    type Error = BuildError;

    fn try_from(raw: RawProjectFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_project(&raw)?;
        Ok(ProjectModel::new_unchecked(raw))
    }
}

fn validate_raw_project(project: &RawProjectFile) -> Result<()> {
    ensure_has_targets(project)?;
    validate_target_dependencies(project)?;
    validate_tasks(project)?;
    validate_target_graph(project)?;
    Ok(())
}

fn ensure_has_targets(project: &RawProjectFile) -> Result<()> {
    if project.target.is_empty() {
        return Err(BuildError::ConfigError(
            "project must contain at least one [target.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_target_dependencies(project: &RawProjectFile) -> Result<()> {
    for (name, target) in project.target.iter() {
        for dep in target.depends_on.iter() {
            if dep == name {
                return Err(BuildError::ConfigError(format!(
                    "target '{}' cannot depend on itself in `depends_on`",
                    name
                )));
            }
            if !project.target.contains_key(dep) {
                return Err(BuildError::ConfigError(format!(
                    "target '{}' has unknown dependency '{}' in `depends_on`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_tasks(project: &RawProjectFile) -> Result<()> {
    for (name, target) in project.target.iter() {
        for phase in target.phase.iter() {
            for task in phase.task.iter() {
                validate_task(name, task)?;
            }
        }
    }
    Ok(())
}

fn validate_task(target: &str, task: &TaskSpec) -> Result<()> {
    let fail = |msg: &str| {
        Err(BuildError::ConfigError(format!(
            "target '{}' task '{}': {}",
            target,
            task.rule_display(),
            msg
        )))
    };

    if task.rule.is_empty() || task.rule.iter().any(|t| t.is_empty()) {
        return Err(BuildError::ConfigError(format!(
            "target '{}' has a task with an empty `rule`",
            target
        )));
    }

    match task.action {
        ActionConfig::Process => {
            if task.command.is_empty() {
                return fail("process tasks need a non-empty `command`");
            }
        }
        ActionConfig::WriteFile => {
            if task.contents.is_none() {
                return fail("write-file tasks need `contents`");
            }
            if task.outputs.len() != 1 {
                return fail("write-file tasks need exactly one output");
            }
        }
        ActionConfig::Copy => {
            if task.inputs.len() != 1 || task.outputs.len() != 1 {
                return fail("copy tasks need exactly one input and one output");
            }
        }
        ActionConfig::Mkdir => {
            if task.outputs.len() != 1 {
                return fail("mkdir tasks need exactly one output");
            }
        }
        ActionConfig::Touch => {
            if task.outputs.is_empty() {
                return fail("touch tasks need at least one output");
            }
        }
    }
    Ok(())
}

fn validate_target_graph(project: &RawProjectFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in project.target.keys() {
        graph.add_node(name.as_str());
    }

    for (name, target) in project.target.iter() {
        for dep in target.depends_on.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(BuildError::DagCycle(format!(
                "cycle detected in target graph involving target '{}'",
                node
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    #[test]
    fn rejects_unknown_dependency() {
        let toml = r#"
            [target.App]
            depends_on = ["Missing"]
        "#;
        let err = load_from_str(toml, "/proj").unwrap_err();
        assert!(matches!(err, BuildError::ConfigError(ref m) if m.contains("Missing")));
    }

    #[test]
    fn rejects_target_cycle() {
        let toml = r#"
            [target.A]
            depends_on = ["B"]
            [target.B]
            depends_on = ["A"]
        "#;
        let err = load_from_str(toml, "/proj").unwrap_err();
        assert!(matches!(err, BuildError::DagCycle(_)));
    }

    #[test]
    fn rejects_copy_without_single_input() {
        let toml = r#"
            [target.A]
            [[target.A.phase]]
            name = "resources"
            [[target.A.phase.task]]
            rule = ["Copy", "x"]
            action = "copy"
            outputs = ["out/x"]
        "#;
        let err = load_from_str(toml, "/proj").unwrap_err();
        assert!(matches!(err, BuildError::ConfigError(ref m) if m.contains("copy")));
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        let toml = r#"
            [target.A]
            [[target.A.phase]]
            name = "p"
            [[target.A.phase.task]]
            rule = ["X"]
            action = "teleport"
        "#;
        let err = load_from_str(toml, "/proj").unwrap_err();
        assert!(matches!(err, BuildError::TomlError(_)));
    }

    #[test]
    fn defaults_apply() -> Result<()> {
        let toml = r#"
            [target.A]
        "#;
        let project = load_from_str(toml, "/proj")?;
        assert_eq!(project.engine.memory_cache_size, 4);
        assert_eq!(project.toolchain.identifier, "default");
        assert_eq!(project.build_root(), std::path::PathBuf::from("/proj/build"));
        assert!(project.cache_settings().cache_root.is_none());
        Ok(())
    }
}
