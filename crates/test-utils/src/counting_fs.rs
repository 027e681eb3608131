//! A `FileSystem` wrapper that counts content reads.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use buildplan::fs::{FileStat, FileSystem};

/// Forwards to `inner` and counts `open_read` calls, which is how the
/// engine hashes file contents.
#[derive(Debug)]
pub struct CountingFileSystem {
    inner: Arc<dyn FileSystem>,
    opened: AtomicUsize,
}

impl CountingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn files_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.opened.store(0, Ordering::SeqCst);
    }
}

impl FileSystem for CountingFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.inner.read_to_string(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.inner.write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        self.inner.canonicalize(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        self.inner.modified(path)
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> Result<()> {
        self.inner.set_modified(path, time)
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        self.inner.stat(path)
    }
}
