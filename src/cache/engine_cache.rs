// src/cache/engine_cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::dag::Scheduler;
use crate::description::BuildDescription;
use crate::errors::{BuildError, Result};
use crate::fs::FileSystem;
use crate::incremental::{BuildDatabase, FileCache};

/// Incremental state carried from one build of a manifest to the next.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// The database as the session's last build left it.
    pub db: BuildDatabase,
    /// State store generation `db` matches.
    pub generation: u64,
    /// Stat-validated content hashes.
    pub files: Arc<FileCache>,
}

/// A live scheduling session bound to one manifest.
#[derive(Debug)]
pub struct EngineSession {
    pub manifest_path: PathBuf,
    /// Content hash of the manifest when the session was created.
    pub manifest_hash: Option<String>,
    pub signature: String,
    pub scheduler: Scheduler,
    /// Fixed when the session is created; reuse never re-plans.
    pub max_task_count: usize,
    /// `None` until a build ran on this session.
    pub state: Option<SessionState>,
}

impl EngineSession {
    pub fn new(description: &BuildDescription, manifest_hash: Option<String>) -> Self {
        Self {
            manifest_path: description.artifacts.manifest.clone(),
            manifest_hash,
            signature: description.signature.clone(),
            scheduler: Scheduler::new(description.graph.clone(), &description.tasks),
            max_task_count: description.max_task_count(),
            state: None,
        }
    }
}

/// How a session was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReuse {
    Reused,
    /// A new session was created; carries why the cached one was unusable.
    Created { reason: String },
}

/// Cache of execution sessions keyed by manifest path.
///
/// Sessions are checked out for the duration of a build and checked back
/// in afterwards, so concurrent builds of the same manifest never share a
/// scheduler.
#[derive(Debug)]
pub struct EngineCache {
    fs: Arc<dyn FileSystem>,
    enabled: bool,
    sessions: Mutex<HashMap<PathBuf, EngineSession>>,
}

impl EngineCache {
    pub fn new(fs: Arc<dyn FileSystem>, enabled: bool) -> Self {
        Self {
            fs,
            enabled,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, EngineSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn manifest_hash(&self, path: &Path) -> Option<String> {
        let bytes = self.fs.read(path).ok()?;
        Some(blake3::hash(&bytes).to_hex().to_string())
    }

    fn validate(&self, session: &EngineSession, description: &BuildDescription) -> Result<()> {
        let path = &session.manifest_path;
        let stale = |reason: String| Err(BuildError::StaleExecutionEngineState(reason));
        if !self.fs.is_file(path) {
            return stale(format!("manifest {:?} was deleted", path));
        }
        if session.manifest_hash != self.manifest_hash(path) {
            return stale(format!("manifest {:?} changed", path));
        }
        if session.signature != description.signature {
            return stale(format!(
                "session bound to {} but description is {}",
                session.signature, description.signature
            ));
        }
        Ok(())
    }

    /// Take the session for the description's manifest, reusing the cached
    /// one when the manifest and signature are unchanged.
    pub fn checkout(&self, description: &BuildDescription) -> (EngineSession, SessionReuse) {
        let manifest = &description.artifacts.manifest;
        if !self.enabled {
            let session = EngineSession::new(description, self.manifest_hash(manifest));
            return (
                session,
                SessionReuse::Created {
                    reason: "execution engine caching disabled".to_string(),
                },
            );
        }

        let cached = self.lock().remove(manifest);
        let reason = match cached {
            Some(session) => match self.validate(&session, description) {
                Ok(()) => {
                    debug!(manifest = ?manifest, "reusing execution engine session");
                    return (session, SessionReuse::Reused);
                }
                Err(err) => {
                    info!(error = %err, "discarding execution engine session");
                    err.to_string()
                }
            },
            None => "no cached session".to_string(),
        };

        (
            EngineSession::new(description, self.manifest_hash(manifest)),
            SessionReuse::Created { reason },
        )
    }

    /// Return a session after a build.
    ///
    /// Sessions whose manifest could not be hashed are dropped.
    pub fn checkin(&self, session: EngineSession) {
        if !self.enabled || session.manifest_hash.is_none() {
            return;
        }
        self.lock().insert(session.manifest_path.clone(), session);
    }

    /// Forget the session bound to `manifest_path`.
    pub fn clear(&self, manifest_path: &Path) {
        self.lock().remove(manifest_path);
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;
    use crate::description::DescriptionBuilder;
    use crate::fs::mock::MockFileSystem;
    use crate::types::{BuildParameters, BuildRequest};

    const PROJECT: &str = r#"
[target.App]
[[target.App.phase]]
name = "sources"
[[target.App.phase.task]]
rule = ["Compile", "main.o"]
command = ["cc", "-c", "main.c"]
inputs = ["main.c"]
outputs = ["main.o"]
"#;

    fn description(opt: &str) -> BuildDescription {
        let project = load_from_str(PROJECT, "/p").unwrap();
        let request = BuildRequest::new(
            ["App"],
            BuildParameters::new("Debug").with_override("OPT", opt),
        );
        let builder = DescriptionBuilder::new(&project, &request, "/p/build/cache");
        let plan = builder.plan().unwrap();
        builder.construct(&plan).unwrap()
    }

    fn cache_with_manifest(desc: &BuildDescription) -> (Arc<MockFileSystem>, EngineCache) {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file(&desc.artifacts.manifest, "{}");
        let cache = EngineCache::new(fs.clone(), true);
        (fs, cache)
    }

    #[test]
    fn reuses_session_for_unchanged_manifest() {
        let desc = description("0");
        let (_fs, cache) = cache_with_manifest(&desc);

        let (session, reuse) = cache.checkout(&desc);
        assert!(matches!(reuse, SessionReuse::Created { .. }));
        cache.checkin(session);
        assert_eq!(cache.len(), 1);

        let (session, reuse) = cache.checkout(&desc);
        assert_eq!(reuse, SessionReuse::Reused);
        assert_eq!(session.max_task_count, 1);
    }

    #[test]
    fn changed_manifest_invalidates_session() {
        let desc = description("0");
        let (fs, cache) = cache_with_manifest(&desc);

        let (session, _) = cache.checkout(&desc);
        cache.checkin(session);
        fs.add_file(&desc.artifacts.manifest, "{\"changed\": true}");

        let (_, reuse) = cache.checkout(&desc);
        match reuse {
            SessionReuse::Created { reason } => assert!(reason.contains("changed"), "{reason}"),
            other => panic!("expected a new session, got {other:?}"),
        }
    }

    #[test]
    fn deleted_manifest_invalidates_session() {
        let desc = description("0");
        let (fs, cache) = cache_with_manifest(&desc);

        let (session, _) = cache.checkout(&desc);
        cache.checkin(session);
        fs.remove_file(&desc.artifacts.manifest).unwrap();

        let (_, reuse) = cache.checkout(&desc);
        match reuse {
            SessionReuse::Created { reason } => assert!(reason.contains("deleted"), "{reason}"),
            other => panic!("expected a new session, got {other:?}"),
        }
    }

    #[test]
    fn signature_mismatch_invalidates_session() {
        let desc = description("0");
        let (_fs, cache) = cache_with_manifest(&desc);
        let (mut session, _) = cache.checkout(&desc);
        session.signature = description("1").signature;
        cache.checkin(session);

        let (_, reuse) = cache.checkout(&desc);
        assert!(matches!(reuse, SessionReuse::Created { .. }));
    }

    #[test]
    fn sessions_without_manifest_hash_are_not_kept() {
        let desc = description("0");
        let fs = Arc::new(MockFileSystem::new());
        let cache = EngineCache::new(fs, true);

        let (session, _) = cache.checkout(&desc);
        assert!(session.manifest_hash.is_none());
        cache.checkin(session);
        assert!(cache.is_empty());
    }
}
