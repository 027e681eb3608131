// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod description;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod incremental;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::description::BuildDescription;
use crate::engine::{BuildDelegate, BuildEvent, BuildService, BuildStatus, CancelHandle};
use crate::errors::Result;
use crate::exec::ShellExecutor;
use crate::fs::RealFileSystem;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - project loading
/// - the build service (caches, execution sessions, state database)
/// - the process executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<BuildStatus> {
    let project_path = PathBuf::from(&args.project);
    let mut project = load_and_validate(&project_path)?;
    if let Some(jobs) = args.jobs {
        project.engine.jobs = jobs;
    }
    let request = args.build_request();

    let service = BuildService::for_project(
        Arc::new(RealFileSystem),
        Arc::new(ShellExecutor),
        &project,
    );

    if args.print_plan {
        let restored = service.describe(&project, &request)?;
        print_plan(&restored.description);
        return Ok(BuildStatus::Succeeded);
    }

    // Ctrl-C stops scheduling; in-flight tasks finish.
    let cancel = CancelHandle::new();
    {
        let handle = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            handle.cancel();
        });
    }

    info!(project = ?project_path, targets = ?request.targets, "starting build");
    let result = service
        .build_with_cancel(&project, &request, Arc::new(ConsoleDelegate), cancel)
        .await?;
    Ok(result.status)
}

/// Prints progress to stdout and diagnostics to stderr.
struct ConsoleDelegate;

impl BuildDelegate for ConsoleDelegate {
    fn on_event(&self, event: &BuildEvent) {
        match event {
            BuildEvent::TaskStarted {
                rule_info,
                progress,
                ..
            } => {
                let position = progress.started + progress.up_to_date;
                println!("[{position}/{}] {rule_info}", progress.max);
            }
            BuildEvent::TaskCompleted {
                rule_info, outcome, ..
            } if !outcome.is_success() => {
                println!("FAILED {rule_info}");
            }
            BuildEvent::Diagnostic(diagnostic) => {
                eprintln!("{diagnostic}");
            }
            BuildEvent::BuildCompleted { status } => {
                let status = status.to_string().to_uppercase();
                println!("** BUILD {status} **");
            }
            other => {
                debug!(?other, "build event");
            }
        }
    }
}

/// Simple plan output: targets, then every task with its edges.
fn print_plan(description: &BuildDescription) {
    println!("buildplan plan {}", description.signature);
    println!();

    println!("targets ({}):", description.targets.len());
    for target in &description.targets {
        println!("  - {}", target.name());
        if let Some(deps) = description.target_dependencies.get(target.name()) {
            if !deps.is_empty() {
                println!("      depends on: {:?}", deps);
            }
        }
    }
    println!();

    println!(
        "tasks ({}, {} real):",
        description.tasks.len(),
        description.max_task_count()
    );
    for (index, task) in description.tasks.iter().enumerate() {
        let marker = if task.is_gate() { "gate" } else { "task" };
        println!("  [{index}] {marker} {}", task.key);
        if !task.command_line.is_empty() {
            println!("      cmd: {}", task.command_line.join(" "));
        }
        let preds = description.graph.predecessors_of(index);
        if !preds.is_empty() {
            println!("      after: {:?}", preds);
        }
    }

    for diagnostic in &description.diagnostics {
        println!("{diagnostic}");
    }
    debug!("plan printed (no execution)");
}
