// src/config/mod.rs

//! Project model loading and validation for buildplan.
//!
//! Responsibilities:
//! - Define the TOML-backed project model (`model.rs`).
//! - Load a project file from disk (`loader.rs`).
//! - Validate basic invariants like target graph correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ActionConfig, EngineSection, PhaseConfig, ProjectModel, RawProjectFile, TargetConfig,
    TaskSpec, ToolchainSection,
};
