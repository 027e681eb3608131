// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ProjectModel, RawProjectFile};
use crate::errors::Result;

/// Load a project file from a given path and return the raw `RawProjectFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (target graph correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawProjectFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let project: RawProjectFile = toml::from_str(&contents)?;

    Ok(project)
}

/// Load a project file from path, validate it and record its directory.
///
/// Relative paths inside the project (`build_root`, task inputs and
/// outputs) resolve against the directory holding the file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectModel> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let project = ProjectModel::try_from(raw)?;
    Ok(project.with_project_dir(project_dir_of(path)))
}

/// Parse and validate a project from a TOML string.
pub fn load_from_str(contents: &str, project_dir: impl Into<PathBuf>) -> Result<ProjectModel> {
    let raw: RawProjectFile = toml::from_str(contents)?;
    Ok(ProjectModel::try_from(raw)?.with_project_dir(project_dir))
}

fn project_dir_of(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::canonicalize(&parent).unwrap_or(parent)
}
