// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::{BuildParameters, BuildRequest, DependencyScope};

/// Command-line arguments for `buildplan`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildplan",
    version,
    about = "Plan and incrementally run builds from a declarative project file.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Buildplan.toml")]
    pub project: String,

    /// Target to build; repeatable. Defaults to every target.
    #[arg(long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// Build configuration name.
    #[arg(long, value_name = "NAME", default_value = "Debug")]
    pub configuration: String,

    /// Override a build setting; repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,

    /// Active run destination.
    #[arg(long, value_name = "NAME")]
    pub destination: Option<String>,

    /// Worker pool size (0 = available parallelism). Overrides `engine.jobs`.
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Build targets one after another instead of in parallel.
    #[arg(long)]
    pub serial_targets: bool,

    /// Keep building unrelated work after a task fails.
    #[arg(long)]
    pub keep_going: bool,

    /// Build only the named targets, not their dependencies.
    #[arg(long)]
    pub targets_only: bool,

    /// Infer target dependencies from produced and consumed paths.
    #[arg(long)]
    pub implicit_dependencies: bool,

    /// Report what would run without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the constructed plan and exit.
    #[arg(long)]
    pub print_plan: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDPLAN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    pub fn build_request(&self) -> BuildRequest {
        let mut parameters = BuildParameters::new(self.configuration.clone());
        for (key, value) in &self.overrides {
            parameters = parameters.with_override(key.clone(), value.clone());
        }
        let mut request = BuildRequest::new(self.targets.iter().cloned(), parameters);
        request.destination = self.destination.clone();
        request.dependency_scope = if self.targets_only {
            DependencyScope::TargetsOnly
        } else {
            DependencyScope::Workspace
        };
        request.continue_building_after_errors = self.keep_going;
        request.use_parallel_targets = !self.serial_targets;
        request.use_implicit_dependencies = self.implicit_dependencies;
        request.use_dry_run = self.dry_run;
        request
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
