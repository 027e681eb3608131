// src/fs/mock.rs

use super::{FileStat, FileSystem};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { content: Vec<u8>, modified: SystemTime },
    Dir { modified: SystemTime },
}

impl MockEntry {
    fn modified(&self) -> SystemTime {
        match self {
            MockEntry::File { modified, .. } | MockEntry::Dir { modified } => *modified,
        }
    }
}

/// In-memory filesystem for tests.
///
/// Modification times come from a logical clock that advances by one second
/// on every mutation, so "newer" is always observable without sleeping.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<BTreeMap<PathBuf, MockEntry>>>,
    clock: Arc<AtomicU64>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let now = self.tick();
        let mut entries = self.lock();
        ensure_parents(&mut entries, &path, now);
        entries.insert(
            path,
            MockEntry::File {
                content: content.into(),
                modified: now,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let now = self.tick();
        let mut entries = self.lock();
        ensure_parents(&mut entries, &path, now);
        entries
            .entry(path)
            .or_insert(MockEntry::Dir { modified: now });
    }

    /// All paths currently present, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }

    fn tick(&self) -> SystemTime {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + n)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_parents(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path, now: SystemTime) {
    for ancestor in path.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        entries
            .entry(ancestor.to_path_buf())
            .or_insert(MockEntry::Dir { modified: now });
    }
}

fn subtree_keys(entries: &BTreeMap<PathBuf, MockEntry>, root: &Path) -> Vec<PathBuf> {
    entries
        .keys()
        .filter(|p| p.starts_with(root))
        .cloned()
        .collect()
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let entries = self.lock();
        match entries.get(path) {
            Some(MockEntry::File { content, .. }) => Ok(content.clone()),
            Some(MockEntry::Dir { .. }) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.is_dir(path) {
            bail!("Is a directory: {:?}", path);
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::Dir { .. }))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        // Tests use absolute paths throughout.
        Ok(path.to_path_buf())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.lock();
        match entries.get(path) {
            Some(MockEntry::Dir { .. }) => Ok(entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.is_file(path) {
            bail!("File exists: {:?}", path);
        }
        self.add_dir(path);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut entries = self.lock();
        match entries.get(path) {
            Some(MockEntry::File { .. }) => {
                entries.remove(path);
                Ok(())
            }
            Some(MockEntry::Dir { .. }) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut entries = self.lock();
        if !matches!(entries.get(path), Some(MockEntry::Dir { .. })) {
            bail!("Not a directory or not found: {:?}", path);
        }
        for key in subtree_keys(&entries, path) {
            entries.remove(&key);
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let now = self.tick();
        let mut entries = self.lock();
        if !entries.contains_key(from) {
            bail!("File not found: {:?}", from);
        }
        if matches!(entries.get(to), Some(MockEntry::Dir { .. })) {
            bail!("Directory exists: {:?}", to);
        }
        ensure_parents(&mut entries, to, now);
        for key in subtree_keys(&entries, from) {
            if let Some(entry) = entries.remove(&key) {
                let rel = key.strip_prefix(from).unwrap_or(Path::new(""));
                let dest = if rel.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rel)
                };
                entries.insert(dest, entry);
            }
        }
        Ok(())
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        self.lock()
            .get(path)
            .map(MockEntry::modified)
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> Result<()> {
        let mut entries = self.lock();
        match entries.get_mut(path) {
            Some(MockEntry::File { modified, .. }) | Some(MockEntry::Dir { modified }) => {
                *modified = time;
                Ok(())
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        match self.lock().get(path) {
            Some(MockEntry::File { content, modified }) => Ok(FileStat {
                len: content.len() as u64,
                modified: *modified,
            }),
            Some(MockEntry::Dir { modified }) => Ok(FileStat {
                len: 0,
                modified: *modified,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}
