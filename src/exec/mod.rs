// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `TaskExecutorBackend` the runtime uses in production, which tests can
//!   replace with a fake implementation.
//! - [`task_runner`] decides, executes and records one task.
//! - [`process`] runs external command lines behind the `ProcessExecutor`
//!   trait.
//! - [`actions`] implements in-process actions (write-file, copy, mkdir,
//!   touch).

pub mod actions;
pub mod backend;
pub mod process;
pub mod task_runner;

pub use backend::{ExecutorBackend, TaskExecutorBackend};
pub use process::{ProcessExecutor, ProcessOutput, ProcessRequest, ShellExecutor};
pub use task_runner::{ExecutionLog, TaskRunner};
