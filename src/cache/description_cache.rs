// src/cache/description_cache.rs

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::cache::CacheSettings;
use crate::description::artifacts::{self, is_staging_dir, ArtifactPaths, PACKAGE_FILE};
use crate::description::{BuildDescription, RestoredDescription};
use crate::fs::FileSystem;
use crate::types::DescriptionSource;

/// On-disk tier bookkeeping: signatures in LRU order, oldest first.
#[derive(Debug, Default)]
struct DiskTier {
    order: Vec<String>,
    seeded: bool,
}

impl DiskTier {
    fn touch(&mut self, signature: &str) {
        self.forget(signature);
        self.order.push(signature.to_string());
    }

    fn forget(&mut self, signature: &str) {
        self.order.retain(|s| s != signature);
    }
}

/// Two-tier cache of build descriptions keyed by signature.
///
/// The memory tier hands back the very same `Arc` it was given; the disk
/// tier deserializes fresh objects from the signature directory. Each tier
/// has its own lock and its own LRU order. Cache-layer failures are logged
/// and treated as misses.
#[derive(Debug)]
pub struct DescriptionCache {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    disk_capacity: usize,
    memory: Mutex<Option<LruCache<String, Arc<BuildDescription>>>>,
    disk: Mutex<DiskTier>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DescriptionCache {
    pub fn new(fs: Arc<dyn FileSystem>, settings: &CacheSettings, root: impl Into<PathBuf>) -> Self {
        let memory = NonZeroUsize::new(settings.effective_memory_capacity()).map(LruCache::new);
        Self {
            fs,
            root: root.into(),
            disk_capacity: settings.effective_disk_capacity(),
            memory: Mutex::new(memory),
            disk: Mutex::new(DiskTier::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_paths(&self, signature: &str) -> ArtifactPaths {
        ArtifactPaths::new(&self.root, signature)
    }

    /// Look up `signature`, memory tier first.
    ///
    /// A memory hit whose manifest has disappeared is dropped and the lookup
    /// falls through to disk.
    pub fn get(&self, signature: &str) -> Option<RestoredDescription> {
        if let Some(hit) = self.get_from_memory(signature) {
            return Some(hit);
        }
        self.get_from_disk(signature)
    }

    fn get_from_memory(&self, signature: &str) -> Option<RestoredDescription> {
        let mut guard = lock(&self.memory);
        let tier = guard.as_mut()?;
        let description = Arc::clone(tier.get(signature)?);

        if !self.fs.is_file(&description.artifacts.manifest) {
            info!(
                signature = %signature,
                manifest = ?description.artifacts.manifest,
                "manifest missing; dropping in-memory description"
            );
            tier.pop(signature);
            return None;
        }

        drop(guard);
        self.touch_disk(signature);

        debug!(signature = %signature, "in-memory description cache hit");
        Some(RestoredDescription {
            description,
            source: DescriptionSource::InMemoryCache,
        })
    }

    fn get_from_disk(&self, signature: &str) -> Option<RestoredDescription> {
        if self.disk_capacity == 0 {
            return None;
        }
        let mut disk = lock(&self.disk);
        self.seed(&mut disk);

        let paths = self.artifact_paths(signature);
        if !self.fs.is_dir(&paths.dir) {
            disk.forget(signature);
            debug!(signature = %signature, "description cache miss");
            return None;
        }

        match artifacts::restore(self.fs.as_ref(), &self.root, signature) {
            Ok(description) => {
                self.mark_used(&mut disk, signature);
                drop(disk);

                let description = Arc::new(description);
                self.insert_memory(&description);
                info!(signature = %signature, "on-disk description cache hit");
                Some(RestoredDescription {
                    description,
                    source: DescriptionSource::OnDiskCache,
                })
            }
            Err(err) => {
                warn!(signature = %signature, error = %err, "discarding corrupt cache entry");
                if let Err(e) = self.fs.remove_dir_all(&paths.dir) {
                    warn!(signature = %signature, error = %e, "failed to delete corrupt entry");
                }
                disk.forget(signature);
                None
            }
        }
    }

    /// Move `signature` to the most recent end of the disk order, so an
    /// entry served from memory keeps its directory.
    fn touch_disk(&self, signature: &str) {
        let mut disk = lock(&self.disk);
        self.seed(&mut disk);
        self.mark_used(&mut disk, signature);
    }

    fn mark_used(&self, disk: &mut DiskTier, signature: &str) {
        disk.touch(signature);
        let package = self.artifact_paths(signature).package;
        if let Err(err) = self.fs.set_modified(&package, SystemTime::now()) {
            debug!(signature = %signature, error = %err, "could not bump entry mtime");
        }
    }

    /// Publish a freshly constructed description to both tiers and evict
    /// beyond capacity.
    ///
    /// The artifacts are always written since execution binds to the
    /// manifest; with the disk tier disabled only the newest entry is kept.
    pub fn put(&self, description: &Arc<BuildDescription>) {
        let signature = description.signature.clone();
        {
            let mut disk = lock(&self.disk);
            self.seed(&mut disk);

            match artifacts::publish(self.fs.as_ref(), description) {
                Ok(written) => debug!(signature = %signature, written, "stored description artifacts"),
                Err(err) => warn!(signature = %signature, error = %err, "failed to persist description"),
            }
            disk.touch(&signature);
            self.evict(&mut disk, self.disk_capacity.max(1));
        }
        self.insert_memory(description);
    }

    fn insert_memory(&self, description: &Arc<BuildDescription>) {
        let mut guard = lock(&self.memory);
        if let Some(tier) = guard.as_mut() {
            if let Some((evicted, _)) = tier.push(description.signature.clone(), Arc::clone(description)) {
                if evicted != description.signature {
                    debug!(signature = %evicted, "evicted description from memory tier");
                }
            }
        }
    }

    fn evict(&self, disk: &mut DiskTier, capacity: usize) {
        while disk.order.len() > capacity {
            let victim = disk.order.remove(0);
            let dir = self.root.join(&victim);
            match self.fs.remove_dir_all(&dir) {
                Ok(()) => info!(signature = %victim, "evicted description from disk tier"),
                Err(err) => warn!(signature = %victim, error = %err, "failed to evict cache entry"),
            }
        }
    }

    /// Load the LRU order of entries already on disk, oldest first by the
    /// package file's modification time.
    fn seed(&self, disk: &mut DiskTier) {
        if disk.seeded {
            return;
        }
        disk.seeded = true;
        let Ok(entries) = self.fs.read_dir(&self.root) else {
            return;
        };
        let mut found: Vec<(SystemTime, String)> = entries
            .into_iter()
            .filter(|p| self.fs.is_dir(p) && !is_staging_dir(p))
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                let mtime = self
                    .fs
                    .modified(&p.join(PACKAGE_FILE))
                    .or_else(|_| self.fs.modified(&p))
                    .ok()?;
                Some((mtime, name))
            })
            .collect();
        found.sort();
        for (_, signature) in found {
            if !disk.order.contains(&signature) {
                disk.order.push(signature);
            }
        }
        debug!(entries = disk.order.len(), "seeded on-disk description tier");
    }

    /// Drop every in-memory description.
    pub fn clear_memory(&self) {
        if let Some(tier) = lock(&self.memory).as_mut() {
            tier.clear();
        }
    }

    pub fn in_memory_size(&self) -> usize {
        lock(&self.memory).as_ref().map_or(0, LruCache::len)
    }

    /// Number of signature directories currently retained on disk.
    pub fn on_disk_cache_size(&self) -> usize {
        self.fs
            .read_dir(&self.root)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|p| self.fs.is_dir(p) && !is_staging_dir(p))
                    .count()
            })
            .unwrap_or(0)
    }
}
