// src/incremental/hash.rs

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::dag::task::{NodeRole, TaskNode};
use crate::fs::FileSystem;
use crate::incremental::file_cache::FileCache;

/// Signature recorded for virtual nodes, which never exist on disk.
pub const VIRTUAL_NODE_SIGNATURE: &str = "virtual";

/// Compute the content hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn build_exclusion_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid exclusion pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Structural signature of a directory tree.
///
/// Composed from the sorted relative path and content hash of every file,
/// the relative path of every subdirectory, and the optional mutation
/// `stamp`. Entries whose relative path matches an exclusion pattern are
/// skipped together with everything below them.
pub fn compute_directory_signature(
    fs: &dyn FileSystem,
    files: &FileCache,
    root: &Path,
    exclusions: &[String],
    stamp: Option<&str>,
) -> Result<String> {
    let excluded = build_exclusion_set(exclusions)?;
    let mut entries: Vec<(PathBuf, String)> = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            if excluded.is_match(&rel) {
                debug!(path = ?path, "excluded from directory signature");
                continue;
            }
            if fs.is_dir(&path) {
                entries.push((rel, "dir".to_string()));
                stack.push(path);
            } else {
                let hash = files.get_or_compute(fs, &path)?;
                entries.push((rel, hash));
            }
        }
    }
    entries.sort();

    let mut hasher = Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        hasher.update(&[0]);
    }
    if let Some(stamp) = stamp {
        hasher.update(b"stamp");
        hasher.update(stamp.as_bytes());
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Current signature of a declared node, or `None` if it does not exist.
pub fn node_signature(
    fs: &dyn FileSystem,
    files: &FileCache,
    node: &TaskNode,
    stamp: Option<&str>,
) -> Result<Option<String>> {
    match node.role {
        NodeRole::Virtual => Ok(Some(VIRTUAL_NODE_SIGNATURE.to_string())),
        NodeRole::File => {
            if !fs.is_file(&node.path) {
                return Ok(None);
            }
            files.get_or_compute(fs, &node.path).map(Some)
        }
        NodeRole::DirectoryTree => {
            if !fs.is_dir(&node.path) {
                return Ok(None);
            }
            compute_directory_signature(fs, files, &node.path, &node.exclusions, stamp).map(Some)
        }
    }
}
