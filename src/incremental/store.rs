// src/incremental/store.rs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs::FileSystem;

pub const BUILD_DATABASE_VERSION: u32 = 1;

/// What a task saw when it last succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_signature: String,
    pub inputs: BTreeMap<PathBuf, String>,
    pub outputs: BTreeMap<PathBuf, String>,
}

/// Persisted incremental build state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDatabase {
    pub version: u32,
    /// Task state key to its last successful execution.
    pub tasks: BTreeMap<String, TaskRecord>,
    /// Path to the signature it had when last written by a task.
    pub nodes: BTreeMap<PathBuf, String>,
}

impl Default for BuildDatabase {
    fn default() -> Self {
        Self {
            version: BUILD_DATABASE_VERSION,
            tasks: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }
}

impl BuildDatabase {
    /// Layer one build's writes over this database.
    pub fn apply(&mut self, changes: &DatabaseChanges) {
        for (key, record) in &changes.tasks {
            match record {
                Some(record) => {
                    self.tasks.insert(key.clone(), record.clone());
                }
                None => {
                    self.tasks.remove(key);
                }
            }
        }
        for (path, sig) in &changes.nodes {
            self.nodes.insert(path.clone(), sig.clone());
        }
    }
}

/// Records one build wrote: `None` forgets a task.
///
/// Saved by re-applying them to whatever the store holds at the end of the
/// build, so concurrent builds sharing a store keep each other's records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseChanges {
    pub tasks: BTreeMap<String, Option<TaskRecord>>,
    pub nodes: BTreeMap<PathBuf, String>,
}

impl DatabaseChanges {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.nodes.is_empty()
    }
}

/// Abstract storage for the build database.
pub trait BuildStateStore: Send + Sync + Debug {
    fn load(&self) -> Result<BuildDatabase>;
    fn save(&self, db: &BuildDatabase) -> Result<()>;
}

/// Stores the database as JSON at `<build_root>/buildplan.db`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }
}

impl BuildStateStore for FileStateStore {
    /// A missing, unreadable or outdated database starts the build from
    /// scratch instead of failing it.
    fn load(&self) -> Result<BuildDatabase> {
        if !self.fs.is_file(&self.path) {
            debug!(path = ?self.path, "no build database yet");
            return Ok(BuildDatabase::default());
        }
        let parsed = self
            .fs
            .read(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<BuildDatabase>(&bytes).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(db) if db.version == BUILD_DATABASE_VERSION => Ok(db),
            Ok(db) => {
                warn!(path = ?self.path, version = db.version, "discarding build database with unknown version");
                Ok(BuildDatabase::default())
            }
            Err(reason) => {
                warn!(path = ?self.path, %reason, "discarding unreadable build database");
                Ok(BuildDatabase::default())
            }
        }
    }

    fn save(&self, db: &BuildDatabase) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(db)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".tmp-{}", std::process::id()));
        let tmp = PathBuf::from(tmp);
        self.fs.write(&tmp, &bytes)?;
        self.fs.rename(&tmp, &self.path)?;
        info!(path = ?self.path, tasks = db.tasks.len(), "stored build database");
        Ok(())
    }
}

/// Keeps the database in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    db: Mutex<BuildDatabase>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildStateStore for MemoryStateStore {
    fn load(&self) -> Result<BuildDatabase> {
        Ok(self.db.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, db: &BuildDatabase) -> Result<()> {
        *self.db.lock().unwrap_or_else(PoisonError::into_inner) = db.clone();
        debug!(tasks = db.tasks.len(), "stored build database (memory)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use std::path::Path;

    #[test]
    fn file_store_round_trip_and_corruption() -> Result<()> {
        let mock = Arc::new(MockFileSystem::new());
        let store = FileStateStore::new(mock.clone(), "/p/build/buildplan.db");
        assert_eq!(store.load()?, BuildDatabase::default());

        let mut db = BuildDatabase::default();
        db.tasks.insert(
            "App:CompileC main.o".to_string(),
            TaskRecord {
                task_signature: "abc".to_string(),
                ..TaskRecord::default()
            },
        );
        db.nodes.insert(PathBuf::from("/p/build/main.o"), "h1".to_string());
        store.save(&db)?;
        assert_eq!(store.load()?, db);
        assert!(mock.paths().iter().all(|p| !p.to_string_lossy().contains(".tmp-")));

        mock.add_file(Path::new("/p/build/buildplan.db"), "{ not json");
        assert_eq!(store.load()?, BuildDatabase::default());
        Ok(())
    }

    #[test]
    fn changes_layer_over_newer_state() {
        let record = |sig: &str| TaskRecord {
            task_signature: sig.to_string(),
            ..TaskRecord::default()
        };
        let mut stored = BuildDatabase::default();
        stored.tasks.insert("Lib:Compile lib.o".into(), record("lib"));
        stored.tasks.insert("App:Link app".into(), record("old"));

        let mut changes = DatabaseChanges::default();
        changes.tasks.insert("App:Compile main.o".into(), Some(record("main")));
        changes.tasks.insert("App:Link app".into(), None);
        changes.nodes.insert(PathBuf::from("/p/out/main.o"), "h".into());
        stored.apply(&changes);

        let keys: Vec<&str> = stored.tasks.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["App:Compile main.o", "Lib:Compile lib.o"]);
        assert_eq!(stored.nodes.len(), 1);
    }
}
