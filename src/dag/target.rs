// src/dag/target.rs

//! Interning of (target, parameters) pairs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A target configured with one resolved parameter set.
///
/// Identity is the pair `(target, parameters)` where `parameters` is the
/// signature of the target's resolved, output-relevant settings. Instances
/// are shared through [`TargetRegistry`]; compare with `Arc::ptr_eq` when
/// identity matters and with `==` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfiguredTarget {
    pub target: String,
    pub parameters: String,
}

impl ConfiguredTarget {
    pub fn name(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for ConfiguredTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.parameters.get(..8).unwrap_or(&self.parameters);
        write!(f, "{}@{}", self.target, short)
    }
}

/// Registry handing out one shared [`ConfiguredTarget`] per distinct pair.
///
/// Populated single-threaded while a description is built or restored; the
/// resulting `Arc`s are immutable and freely shared with executing tasks.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    by_key: HashMap<(String, String), Arc<ConfiguredTarget>>,
    ordered: Vec<Arc<ConfiguredTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing instance for the pair, or register a new one.
    pub fn intern(&mut self, target_id: &str, parameter_signature: &str) -> Arc<ConfiguredTarget> {
        let key = (target_id.to_string(), parameter_signature.to_string());
        if let Some(existing) = self.by_key.get(&key) {
            return Arc::clone(existing);
        }
        let target = Arc::new(ConfiguredTarget {
            target: key.0.clone(),
            parameters: key.1.clone(),
        });
        self.by_key.insert(key, Arc::clone(&target));
        self.ordered.push(Arc::clone(&target));
        target
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Registered targets in registration order.
    pub fn targets(&self) -> &[Arc<ConfiguredTarget>] {
        &self.ordered
    }

    /// Position of `target` in registration order.
    pub fn index_of(&self, target: &ConfiguredTarget) -> Option<usize> {
        self.ordered.iter().position(|t| **t == *target)
    }

    pub fn into_targets(self) -> Vec<Arc<ConfiguredTarget>> {
        self.ordered
    }
}
