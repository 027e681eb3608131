// src/description/builder.rs

//! Turns a validated project model plus a build request into a
//! [`BuildDescription`].
//!
//! Construction happens in two steps so the cache can be consulted in
//! between: [`DescriptionBuilder::plan`] resolves settings, selects targets
//! and computes the signature; [`DescriptionBuilder::construct`] emits the
//! task graph.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info, warn};

use crate::config::model::{ActionConfig, ProjectModel, TaskSpec};
use crate::dag::graph::TaskGraph;
use crate::dag::target::{ConfiguredTarget, TargetRegistry};
use crate::dag::task::{
    compute_task_signature, GateKind, NodeRole, SignatureInput, Task, TaskAction, TaskNode,
    TaskType,
};
use crate::description::artifacts::ArtifactPaths;
use crate::description::settings::{output_agnostic_settings, MacroExpander, ResolvedSettings};
use crate::description::signature::compute_description_signature;
use crate::description::{compute_directory_stamps, compute_task_action_map, BuildDescription};
use crate::errors::{BuildError, Result};
use crate::types::{BuildRequest, DependencyScope, Diagnostic};

/// A target selected for the build, with its resolved settings.
#[derive(Debug, Clone)]
pub struct PlannedTarget {
    pub name: String,
    pub settings: ResolvedSettings,
    /// Included targets this one waits on (declared plus implicit), sorted.
    pub depends_on: Vec<String>,
}

/// Output of the planning step: everything needed to look up or construct
/// the description.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub signature: String,
    /// Selected targets in dependency order.
    pub targets: Vec<PlannedTarget>,
}

pub struct DescriptionBuilder<'a> {
    project: &'a ProjectModel,
    request: &'a BuildRequest,
    cache_root: PathBuf,
}

struct TargetSpan {
    start: usize,
    end: usize,
}

impl<'a> DescriptionBuilder<'a> {
    pub fn new(
        project: &'a ProjectModel,
        request: &'a BuildRequest,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project,
            request,
            cache_root: cache_root.into(),
        }
    }

    pub fn plan(&self) -> Result<BuildPlan> {
        let agnostic = output_agnostic_settings(self.project);
        let expander = MacroExpander::new()?;

        let mut settings: BTreeMap<String, ResolvedSettings> = BTreeMap::new();
        for name in self.project.target.keys() {
            let resolved = ResolvedSettings::resolve(
                self.project,
                name,
                &self.request.parameters,
                &agnostic,
                &expander,
            )?;
            settings.insert(name.clone(), resolved);
        }

        let requested: Vec<String> = if self.request.targets.is_empty() {
            self.project.target.keys().cloned().collect()
        } else {
            for name in &self.request.targets {
                if !self.project.target.contains_key(name) {
                    return Err(BuildError::TaskNotFound(name.clone()));
                }
            }
            self.request.targets.clone()
        };

        let mut deps: BTreeMap<String, BTreeSet<String>> = self
            .project
            .target
            .iter()
            .map(|(name, t)| (name.clone(), t.depends_on.iter().cloned().collect()))
            .collect();
        if self.request.use_implicit_dependencies {
            for (consumer, producers) in self.implicit_dependencies(&settings) {
                debug!(target = %consumer, ?producers, "implicit target dependencies");
                deps.entry(consumer).or_default().extend(producers);
            }
        }

        let included: BTreeSet<String> = match self.request.dependency_scope {
            DependencyScope::TargetsOnly => requested.iter().cloned().collect(),
            DependencyScope::Workspace => {
                let mut seen = BTreeSet::new();
                let mut stack = requested.clone();
                while let Some(name) = stack.pop() {
                    if seen.insert(name.clone()) {
                        if let Some(ds) = deps.get(&name) {
                            stack.extend(ds.iter().cloned());
                        }
                    }
                }
                seen
            }
        };

        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in &included {
            graph.add_node(name.as_str());
        }
        for name in &included {
            for dep in deps.get(name).into_iter().flatten() {
                if included.contains(dep) {
                    graph.add_edge(dep.as_str(), name.as_str(), ());
                }
            }
        }
        let order = toposort(&graph, None).map_err(|cycle| {
            BuildError::DagCycle(format!(
                "cycle detected in target graph involving target '{}'",
                cycle.node_id()
            ))
        })?;

        let mut targets = Vec::with_capacity(order.len());
        for name in order {
            let Some(resolved) = settings.get(name) else {
                continue;
            };
            let depends_on = deps
                .get(name)
                .into_iter()
                .flatten()
                .filter(|d| included.contains(*d))
                .cloned()
                .collect();
            targets.push(PlannedTarget {
                name: name.to_string(),
                settings: resolved.clone(),
                depends_on,
            });
        }

        let signature =
            compute_description_signature(self.project, self.request, &targets, &agnostic)?;
        info!(signature = %signature, targets = targets.len(), "planned build");

        Ok(BuildPlan { signature, targets })
    }

    /// Consumer target to the set of other targets producing a path it reads.
    fn implicit_dependencies(
        &self,
        settings: &BTreeMap<String, ResolvedSettings>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut produced: Vec<(TaskNode, &str)> = Vec::new();
        let mut consumed: Vec<(TaskNode, &str)> = Vec::new();
        for (name, target) in &self.project.target {
            let Some(s) = settings.get(name) else {
                continue;
            };
            for spec in target.phase.iter().flat_map(|p| p.task.iter()) {
                for raw in &spec.outputs {
                    produced.push((
                        TaskNode::parse(&s.expand(raw, false), &self.project.project_dir),
                        name.as_str(),
                    ));
                }
                for raw in &spec.inputs {
                    consumed.push((
                        TaskNode::parse(&s.expand(raw, false), &self.project.project_dir),
                        name.as_str(),
                    ));
                }
            }
        }

        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (input, consumer) in &consumed {
            for (output, producer) in &produced {
                if consumer == producer {
                    continue;
                }
                let related = match (input.role, output.role) {
                    (NodeRole::Virtual, _) | (_, NodeRole::Virtual) => input.path == output.path,
                    (NodeRole::DirectoryTree, _) => output.path.starts_with(&input.path),
                    (_, NodeRole::DirectoryTree) => input.path.starts_with(&output.path),
                    _ => input.path == output.path,
                };
                if related {
                    out.entry(consumer.to_string())
                        .or_default()
                        .insert(producer.to_string());
                }
            }
        }
        out
    }

    pub fn construct(&self, plan: &BuildPlan) -> Result<BuildDescription> {
        let mut registry = TargetRegistry::new();
        let mut tasks: Vec<Task> = Vec::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut spans: BTreeMap<String, TargetSpan> = BTreeMap::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        for planned in &plan.targets {
            let configured =
                registry.intern(&planned.name, &planned.settings.parameter_signature());
            let span = self.emit_target(planned, &configured, &mut tasks, &mut edges);
            spans.insert(planned.name.clone(), span);
        }

        // Target ordering.
        for planned in &plan.targets {
            let Some(span) = spans.get(&planned.name) else {
                continue;
            };
            for dep in &planned.depends_on {
                if let Some(dep_span) = spans.get(dep) {
                    edges.push((dep_span.end, span.start));
                }
            }
        }
        if !self.request.use_parallel_targets {
            let ordered: Vec<&TargetSpan> = plan
                .targets
                .iter()
                .filter_map(|t| spans.get(&t.name))
                .collect();
            for pair in ordered.windows(2) {
                edges.push((pair[0].end, pair[1].start));
            }
        }

        let failed_targets = add_node_edges(&tasks, &mut edges, &mut diagnostics);

        for task in tasks.iter().filter(|t| t.always_out_of_date()) {
            let rule = task.rule_display();
            let mut diag = Diagnostic::warning(format!(
                "task '{rule}' has no declared outputs and will run on every build; declare its outputs to enable incremental builds"
            ))
            .for_task(rule);
            if let Some(target) = task.target_name() {
                diag = diag.for_target(target);
            }
            diagnostics.push(diag);
        }

        let graph = TaskGraph::new(tasks.len(), edges)?;
        let tasks: Vec<Arc<Task>> = tasks.into_iter().map(Arc::new).collect();

        let mut copied_path_map = BTreeMap::new();
        let mut duplicate_destinations = BTreeSet::new();
        for task in &tasks {
            if let TaskAction::Copy {
                source,
                destination,
            } = &task.action
            {
                if copied_path_map
                    .insert(destination.clone(), source.clone())
                    .is_some()
                {
                    duplicate_destinations.insert(destination.clone());
                }
            }
        }
        for dup in duplicate_destinations {
            copied_path_map.remove(&dup);
        }

        let target_dependencies = plan
            .targets
            .iter()
            .map(|t| (t.name.clone(), t.depends_on.clone()))
            .collect();

        let description = BuildDescription {
            signature: plan.signature.clone(),
            directory_stamps: compute_directory_stamps(&tasks),
            task_action_map: compute_task_action_map(&tasks),
            tasks,
            graph,
            targets: registry.into_targets(),
            target_dependencies,
            copied_path_map,
            diagnostics,
            failed_targets,
            artifacts: ArtifactPaths::new(&self.cache_root, &plan.signature),
        };

        info!(
            signature = %description.signature,
            tasks = description.tasks.len(),
            max_task_count = description.max_task_count(),
            failed_targets = description.failed_targets.len(),
            "constructed build description"
        );
        Ok(description)
    }

    /// Emit the start gate, phase tasks with their boundary gates, and the
    /// end gate of one target.
    fn emit_target(
        &self,
        planned: &PlannedTarget,
        configured: &Arc<ConfiguredTarget>,
        tasks: &mut Vec<Task>,
        edges: &mut Vec<(usize, usize)>,
    ) -> TargetSpan {
        let name = &planned.name;
        let push_gate = |tasks: &mut Vec<Task>, kind: GateKind, label: String| {
            let index = tasks.len();
            let key = format!("P{index}:{name}:Gate {label}");
            tasks.push(Task::gate(key, kind, label, Some(Arc::clone(configured))));
            index
        };

        let start = push_gate(tasks, GateKind::TargetStart, format!("{name}-start"));
        let mut boundary = start;

        let phases = self
            .project
            .target
            .get(name)
            .map(|t| t.phase.as_slice())
            .unwrap_or(&[]);
        for phase in phases {
            let mut members = Vec::with_capacity(phase.task.len());
            for spec in &phase.task {
                let index = tasks.len();
                let task = self.expand_task(spec, index, planned, configured);
                tasks.push(task);
                edges.push((boundary, index));
                members.push(index);
            }
            let gate = push_gate(tasks, GateKind::PhaseEnd, format!("{name}-{}", phase.name));
            if members.is_empty() {
                edges.push((boundary, gate));
            }
            edges.extend(members.into_iter().map(|m| (m, gate)));
            boundary = gate;
        }

        let end = push_gate(tasks, GateKind::TargetEnd, format!("{name}-end"));
        edges.push((boundary, end));

        TargetSpan { start, end }
    }

    fn expand_task(
        &self,
        spec: &TaskSpec,
        index: usize,
        planned: &PlannedTarget,
        configured: &Arc<ConfiguredTarget>,
    ) -> Task {
        let settings = &planned.settings;
        let base = self.project.project_dir.as_path();

        let nodes = |raw: &[String], blank: bool, with_exclusions: bool| -> Vec<TaskNode> {
            raw.iter()
                .map(|r| {
                    let mut node = TaskNode::parse(&settings.expand(r, blank), base);
                    if with_exclusions && node.role == NodeRole::DirectoryTree {
                        node.exclusions = spec.exclude.clone();
                    }
                    node
                })
                .collect()
        };
        let working_directory = |blank: bool| {
            spec.working_directory
                .as_ref()
                .map(|w| resolve(base, &settings.expand(w, blank)))
                .unwrap_or_else(|| base.to_path_buf())
        };

        let command_line = settings.expand_tokens(&spec.command, false);
        let environment = settings.expand_map(&spec.env, false);
        let inputs = nodes(&spec.inputs, false, true);
        let outputs = nodes(&spec.outputs, false, false);
        let action = make_action(spec, &inputs, &outputs, |c| settings.expand(c, false));
        let task_type = TaskType::Tool(spec.tool_token());

        // Signature form: output-agnostic settings expand to nothing.
        let sig_inputs = nodes(&spec.inputs, true, true);
        let sig_outputs = nodes(&spec.outputs, true, false);
        let signature = compute_task_signature(&SignatureInput {
            rule_info: &spec.rule,
            command_line: &settings.expand_tokens(&spec.command, true),
            environment: &settings.expand_map(&spec.env, true),
            working_directory: &working_directory(true),
            action: &make_action(spec, &sig_inputs, &sig_outputs, |c| settings.expand(c, true)),
            inputs: &sig_inputs,
            outputs: &sig_outputs,
            task_type: &task_type,
        });

        if outputs.iter().any(|o| inputs.iter().any(|i| i.path == o.path && !i.is_virtual())) {
            debug!(task = %spec.rule_display(), target = %planned.name, "task mutates one of its inputs");
        }

        Task {
            key: format!("P{index}:{}:{}", planned.name, spec.rule_display()),
            rule_info: spec.rule.clone(),
            command_line,
            environment,
            working_directory: working_directory(false),
            inputs,
            outputs,
            action,
            for_target: Some(Arc::clone(configured)),
            task_type,
            exec_description: spec
                .description
                .as_ref()
                .map(|d| settings.expand(d, false))
                .unwrap_or_else(|| spec.rule_display()),
            signature,
        }
    }
}

fn resolve(base: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn make_action(
    spec: &TaskSpec,
    inputs: &[TaskNode],
    outputs: &[TaskNode],
    expand: impl Fn(&str) -> String,
) -> TaskAction {
    let first_path = |nodes: &[TaskNode]| nodes.first().map(|n| n.path.clone()).unwrap_or_default();
    match spec.action {
        ActionConfig::Process => TaskAction::Process,
        ActionConfig::WriteFile => TaskAction::WriteAuxiliaryFile {
            contents: expand(spec.contents.as_deref().unwrap_or("")),
        },
        ActionConfig::Copy => TaskAction::Copy {
            source: first_path(inputs),
            destination: first_path(outputs),
        },
        ActionConfig::Mkdir => TaskAction::MkDir {
            path: first_path(outputs),
        },
        ActionConfig::Touch => TaskAction::Touch,
    }
}

/// Add producer/consumer and mutation-chain edges, and report duplicate
/// outputs. Returns the targets failed by conflicts.
fn add_node_edges(
    tasks: &[Task],
    edges: &mut Vec<(usize, usize)>,
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeSet<String> {
    // Writers per path in declaration order.
    let mut writers: BTreeMap<&Path, Vec<usize>> = BTreeMap::new();
    let mut directory_outputs: Vec<(&Path, usize)> = Vec::new();
    for (index, task) in tasks.iter().enumerate() {
        for output in &task.outputs {
            let list = writers.entry(output.path.as_path()).or_default();
            if !list.contains(&index) {
                list.push(index);
            }
            if output.role == NodeRole::DirectoryTree {
                directory_outputs.push((output.path.as_path(), index));
            }
        }
    }

    let mut failed_targets = BTreeSet::new();
    let mut conflicted: BTreeSet<&Path> = BTreeSet::new();
    for (path, ws) in &writers {
        let tracked = ws.iter().any(|&w| {
            tasks[w]
                .outputs
                .iter()
                .any(|o| o.path == *path && !o.is_virtual())
        });
        if !tracked || ws.len() < 2 {
            continue;
        }
        if ws.iter().skip(1).all(|&w| tasks[w].mutates(path)) {
            continue;
        }

        let display = path.display();
        let mut message = format!("Multiple commands produce '{display}'");
        for &w in ws {
            let task = &tasks[w];
            let target = task.target_name().unwrap_or("<none>");
            message.push_str(&format!(
                "\n    Target '{target}' has task '{}' with output '{display}'",
                task.rule_display()
            ));
            failed_targets.insert(target.to_string());
        }
        warn!(path = %path.display(), producers = ws.len(), "duplicate output");
        diagnostics.push(Diagnostic::error(message));
        conflicted.insert(*path);
    }

    let ancestors_of = |path: &Path, exclude: usize| -> Vec<usize> {
        directory_outputs
            .iter()
            .filter(|(dir, producer)| *producer != exclude && path != *dir && path.starts_with(dir))
            .map(|(_, producer)| *producer)
            .collect()
    };

    for (index, task) in tasks.iter().enumerate() {
        for input in &task.inputs {
            match input.role {
                NodeRole::Virtual => {
                    for &w in writers.get(input.path.as_path()).into_iter().flatten() {
                        edges.push((w, index));
                    }
                }
                NodeRole::File => {
                    if let Some(ws) = writers.get(input.path.as_path()) {
                        match ws.iter().position(|&w| w == index) {
                            Some(pos) if pos > 0 => edges.push((ws[pos - 1], index)),
                            Some(_) => {}
                            None => {
                                if let Some(&last) = ws.last() {
                                    edges.push((last, index));
                                }
                            }
                        }
                    }
                    edges.extend(ancestors_of(&input.path, index).into_iter().map(|p| (p, index)));
                }
                NodeRole::DirectoryTree => {
                    for (path, ws) in writers.range(input.path.as_path()..) {
                        if !path.starts_with(&input.path) {
                            break;
                        }
                        edges.extend(ws.iter().filter(|&&w| w != index).map(|&w| (w, index)));
                    }
                    edges.extend(ancestors_of(&input.path, index).into_iter().map(|p| (p, index)));
                }
            }
        }
        for output in task.outputs.iter().filter(|o| !o.is_virtual()) {
            edges.extend(ancestors_of(&output.path, index).into_iter().map(|p| (p, index)));
        }
    }

    for (path, ws) in &writers {
        if conflicted.contains(path) {
            continue;
        }
        let chained = ws.iter().skip(1).all(|&w| tasks[w].mutates(path));
        if chained {
            edges.extend(ws.windows(2).map(|pair| (pair[0], pair[1])));
        }
    }

    failed_targets
}
