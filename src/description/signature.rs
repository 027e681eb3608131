// src/description/signature.rs

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::config::model::ProjectModel;
use crate::description::builder::PlannedTarget;
use crate::errors::Result;
use crate::types::BuildRequest;

/// Bumped whenever the planning rules or artifact layout change.
pub const DESCRIPTION_FORMAT_VERSION: u32 = 1;

/// Hash a canonical form of everything that shapes the plan.
///
/// Covered: format version, toolchain, destination, configuration,
/// overrides, planning flags, and per target its output-relevant settings,
/// dependencies and task declarations. Output-agnostic settings are left
/// out, so requests differing only in those hash identically.
pub fn compute_description_signature(
    project: &ProjectModel,
    request: &BuildRequest,
    targets: &[PlannedTarget],
    agnostic: &BTreeSet<String>,
) -> Result<String> {
    let overrides: BTreeMap<&str, &str> = request
        .parameters
        .overrides
        .iter()
        .filter(|(k, _)| !agnostic.contains(k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut target_forms = Vec::with_capacity(targets.len());
    for planned in targets {
        let phases = project
            .target
            .get(&planned.name)
            .map(|t| serde_json::to_value(&t.phase))
            .transpose()?;
        target_forms.push(json!({
            "name": planned.name,
            "settings": planned.settings.relevant(),
            "depends-on": planned.depends_on,
            "phases": phases,
        }));
    }

    let canonical = json!({
        "version": DESCRIPTION_FORMAT_VERSION,
        "toolchain": project.toolchain.identifier,
        "destination": request.destination,
        "configuration": request.parameters.configuration,
        "overrides": overrides,
        "dependency-scope": request.dependency_scope,
        "parallel-targets": request.use_parallel_targets,
        "implicit-dependencies": request.use_implicit_dependencies,
        "targets": target_forms,
    });

    let bytes = serde_json::to_vec(&canonical)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
