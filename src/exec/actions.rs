// src/exec/actions.rs

//! In-process task actions.

use std::path::Path;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::dag::task::{NodeRole, Task, TaskAction};
use crate::fs::FileSystem;

/// Perform a non-process action. Gates and process tasks are rejected.
pub fn perform(fs: &dyn FileSystem, task: &Task) -> Result<()> {
    match &task.action {
        TaskAction::WriteAuxiliaryFile { contents } => {
            let Some(output) = task.outputs.iter().find(|o| !o.is_virtual()) else {
                bail!("task '{}' has no file to write", task.rule_display());
            };
            // Identical contents leave the file (and its mtime) alone.
            if fs.is_file(&output.path) && fs.read(&output.path)? == contents.as_bytes() {
                debug!(path = ?output.path, "auxiliary file unchanged");
                return Ok(());
            }
            fs.write(&output.path, contents.as_bytes())
        }
        TaskAction::Copy {
            source,
            destination,
        } => copy_path(fs, source, destination),
        TaskAction::MkDir { path } => fs.create_dir_all(path),
        TaskAction::Touch => {
            let now = SystemTime::now();
            for output in task.outputs.iter().filter(|o| !o.is_virtual()) {
                match output.role {
                    NodeRole::DirectoryTree => fs.create_dir_all(&output.path)?,
                    _ if !fs.exists(&output.path) => fs.write(&output.path, b"")?,
                    _ => {}
                }
                fs.set_modified(&output.path, now)?;
            }
            Ok(())
        }
        TaskAction::Gate { .. } | TaskAction::Process => {
            bail!("task '{}' has no in-process action", task.rule_display())
        }
    }
}

/// Copy a file, or a directory tree recursively.
pub fn copy_path(fs: &dyn FileSystem, source: &Path, destination: &Path) -> Result<()> {
    if fs.is_dir(source) {
        fs.create_dir_all(destination)?;
        for entry in fs.read_dir(source)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            copy_path(fs, &entry, &destination.join(name))?;
        }
        return Ok(());
    }
    let bytes = fs
        .read(source)
        .with_context(|| format!("copying {:?} to {:?}", source, destination))?;
    fs.write(destination, &bytes)
}
