// src/cache/mod.rs

//! Process-wide caches.
//!
//! - [`description_cache`]: two-tier (memory + disk) LRU of build
//!   descriptions keyed by signature.
//! - [`engine_cache`]: live execution sessions keyed by manifest path,
//!   carrying the scheduler and incremental state between builds.

pub mod description_cache;
pub mod engine_cache;

use std::path::{Path, PathBuf};

pub use description_cache::DescriptionCache;
pub use engine_cache::{EngineCache, EngineSession, SessionReuse, SessionState};

/// Cache configuration consumed by the engine.
///
/// A disabled tier behaves exactly like a tier of capacity 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub memory_capacity: usize,
    pub disk_capacity: usize,
    pub enable_memory: bool,
    pub enable_disk: bool,
    pub enable_engine_cache: bool,
    /// Overrides `<build_root>/BuildDescriptions`.
    pub cache_root: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 4,
            disk_capacity: 4,
            enable_memory: true,
            enable_disk: true,
            enable_engine_cache: true,
            cache_root: None,
        }
    }
}

impl CacheSettings {
    pub fn effective_memory_capacity(&self) -> usize {
        if self.enable_memory { self.memory_capacity } else { 0 }
    }

    pub fn effective_disk_capacity(&self) -> usize {
        if self.enable_disk { self.disk_capacity } else { 0 }
    }

    pub fn resolved_root(&self, build_root: &Path) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(|| build_root.join("BuildDescriptions"))
    }
}
