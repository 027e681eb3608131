// src/incremental/file_cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tracing::debug;

use crate::fs::{FileStat, FileSystem};
use crate::incremental::hash::compute_file_hash;

/// A file modified this close to the moment it was hashed may change again
/// without its stat changing, so such hashes are never trusted.
const RACY_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct CachedHash {
    stat: FileStat,
    hash: String,
    trusted: bool,
}

/// Content hashes validated by file stat.
///
/// A cached hash is returned while the file's size and mtime match what
/// they were when it was hashed; otherwise the file is hashed again. The
/// cache lives as long as the execution session holding it, so a null
/// rebuild only stats its files. Paths a task writes are still invalidated
/// once the task finishes.
#[derive(Debug, Default)]
pub struct FileCache {
    hashes: Mutex<HashMap<PathBuf, CachedHash>>,
    computed: AtomicUsize,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CachedHash>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the hash for a file, re-hashing when its stat changed.
    pub fn get_or_compute(&self, fs: &dyn FileSystem, path: &Path) -> Result<String> {
        let stat = fs.stat(path)?;
        if let Some(cached) = self.lock().get(path) {
            if cached.trusted && cached.stat == stat {
                return Ok(cached.hash.clone());
            }
        }

        debug!("cache miss: computing hash for {:?}", path);
        let hash = compute_file_hash(fs, path)?;
        self.computed.fetch_add(1, Ordering::Relaxed);
        let trusted = stat
            .modified
            .checked_add(RACY_WINDOW)
            .is_some_and(|settled| settled <= SystemTime::now());
        self.lock().insert(
            path.to_path_buf(),
            CachedHash {
                stat,
                hash: hash.clone(),
                trusted,
            },
        );
        Ok(hash)
    }

    /// Invalidate `root` and every cached path below it.
    pub fn invalidate_tree(&self, root: &Path) {
        self.lock().retain(|p, _| !p.starts_with(root));
    }

    /// Number of files hashed since the cache was created.
    pub fn hashes_computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
