// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: SystemTime,
}

/// Abstract filesystem interface.
///
/// Everything the build engine touches on disk (cache entries, the state
/// database, task inputs and outputs) goes through this trait so tests can
/// run against [`mock::MockFileSystem`].
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Write `contents`, creating parent directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Rename a file or directory. The destination must not exist for
    /// directories.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn modified(&self, path: &Path) -> Result<SystemTime>;
    fn set_modified(&self, path: &Path, time: SystemTime) -> Result<()>;

    fn stat(&self, path: &Path) -> Result<FileStat>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("reading file {:?}", path))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).with_context(|| format!("opening file {:?}", path))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("canonicalizing {:?}", path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).with_context(|| format!("removing dir {:?}", path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("renaming {:?} to {:?}", from, to))
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let meta = fs::metadata(path).with_context(|| format!("stat {:?}", path))?;
        meta.modified()
            .with_context(|| format!("reading mtime of {:?}", path))
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("opening {:?} to set mtime", path))?;
        file.set_modified(time)
            .with_context(|| format!("setting mtime of {:?}", path))
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = fs::metadata(path).with_context(|| format!("stat {:?}", path))?;
        Ok(FileStat {
            len: meta.len(),
            modified: meta
                .modified()
                .with_context(|| format!("reading mtime of {:?}", path))?,
        })
    }
}
