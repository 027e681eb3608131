// src/exec/process.rs

//! External process execution.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::task::Task;

/// Everything an executor needs to run one task's command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub key: String,
    pub rule_info: Vec<String>,
    pub command_line: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

impl ProcessRequest {
    pub fn from_task(task: &Task) -> Self {
        let real = |nodes: &[crate::dag::task::TaskNode]| {
            nodes
                .iter()
                .filter(|n| !n.is_virtual())
                .map(|n| n.path.clone())
                .collect()
        };
        Self {
            key: task.key.clone(),
            rule_info: task.rule_info.clone(),
            command_line: task.command_line.clone(),
            environment: task.environment.clone(),
            working_directory: task.working_directory.clone(),
            inputs: real(&task.inputs),
            outputs: real(&task.outputs),
        }
    }

    pub fn rule_display(&self) -> String {
        self.rule_info.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tool invocations. Tests substitute a fake.
pub trait ProcessExecutor: Send + Sync + Debug {
    fn execute<'a>(
        &'a self,
        request: &'a ProcessRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessOutput>> + Send + 'a>>;
}

/// Spawns the command line directly with `tokio::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ProcessExecutor for ShellExecutor {
    fn execute<'a>(
        &'a self,
        request: &'a ProcessRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessOutput>> + Send + 'a>> {
        Box::pin(async move {
            let Some((program, args)) = request.command_line.split_first() else {
                bail!("task '{}' has an empty command line", request.rule_display());
            };
            info!(task = %request.rule_display(), cmd = %request.command_line.join(" "), "starting task process");

            let output = Command::new(program)
                .args(args)
                .envs(&request.environment)
                .current_dir(&request.working_directory)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("spawning process for task '{}'", request.rule_display()))?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            for line in stderr.lines() {
                debug!(task = %request.key, "stderr: {}", line);
            }
            info!(
                task = %request.rule_display(),
                exit_code = output.status.code(),
                success = output.status.success(),
                "task process exited"
            );

            Ok(ProcessOutput {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout,
                stderr,
            })
        })
    }
}
