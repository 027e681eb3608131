// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Diagnostic;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Cycle detected: {0}")]
    DagCycle(String),

    #[error("Build description construction failed with {} error(s)", .0.len())]
    Construction(Vec<Diagnostic>),

    #[error("Corrupt cache entry {signature}: {reason}")]
    CacheCorruption { signature: String, reason: String },

    #[error("missing input '{}' for task '{rule_info}'", .path.display())]
    MissingInput { path: PathBuf, rule_info: String },

    #[error("Stale execution engine state: {0}")]
    StaleExecutionEngineState(String),

    #[error("Target not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    pub(crate) fn corruption(signature: &str, reason: impl Into<String>) -> Self {
        BuildError::CacheCorruption {
            signature: signature.to_string(),
            reason: reason.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildError>;
