// src/engine/operation.rs

//! One build, end to end: description lookup or construction, execution
//! session checkout, incremental execution, state persistence.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::cache::{
    CacheSettings, DescriptionCache, EngineCache, EngineSession, SessionReuse, SessionState,
};
use crate::config::model::ProjectModel;
use crate::description::{BuildDescription, DescriptionBuilder, RestoredDescription};
use crate::engine::core::CoreRuntime;
use crate::engine::events::{BuildDelegate, BuildEvent, BuildProgress, BuildStatus, EventSink};
use crate::engine::runtime::Runtime;
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::errors::Result;
use crate::exec::{ExecutionLog, ProcessExecutor, TaskExecutorBackend, TaskRunner};
use crate::fs::FileSystem;
use crate::incremental::{
    BuildDatabase, BuildStateStore, DatabaseChanges, DecisionEngine, FileCache, FileStateStore,
};
use crate::types::{BuildRequest, DescriptionSource, Diagnostic};

/// What a build did.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub status: BuildStatus,
    /// `None` when planning failed before a description existed.
    pub source: Option<DescriptionSource>,
    pub description: Option<Arc<BuildDescription>>,
    pub session: Option<SessionReuse>,
    /// Keys of tasks that ran (or would have, in a dry run).
    pub executed: Vec<String>,
    pub up_to_date: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub progress: BuildProgress,
    /// Descriptions held by the memory tier once the build finished.
    pub in_memory_cache_size: usize,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    /// Rule info of every executed task, for assertions and display.
    pub fn executed_rules(&self) -> Vec<String> {
        let Some(description) = &self.description else {
            return Vec::new();
        };
        self.executed
            .iter()
            .filter_map(|key| description.task_by_key(key))
            .map(|t| t.rule_display())
            .collect()
    }
}

/// Cancels the one build it is passed to.
///
/// Clones share the request. Cancelling before the build starts is not
/// lost: the build then dispatches only its first ready tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    requested: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.requested.store(true, Ordering::SeqCst);
        // A single build waits on the handle; the permit covers a cancel
        // that lands before it starts waiting.
        self.0.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.notify.notified().await;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide build service owning the caches.
///
/// Concurrent builds may share one service; each checks out its own
/// execution session. Saves of the build database are serialized and
/// merged, so one build never drops another's records.
pub struct BuildService {
    fs: Arc<dyn FileSystem>,
    executor: Arc<dyn ProcessExecutor>,
    descriptions: DescriptionCache,
    engines: EngineCache,
    state_store: Option<Arc<dyn BuildStateStore>>,
    /// Bumped on every database save; guards load and save.
    state_generation: Mutex<u64>,
}

impl fmt::Debug for BuildService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildService")
            .field("descriptions", &self.descriptions)
            .field("engines", &self.engines)
            .finish_non_exhaustive()
    }
}

impl BuildService {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        executor: Arc<dyn ProcessExecutor>,
        settings: &CacheSettings,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            descriptions: DescriptionCache::new(Arc::clone(&fs), settings, cache_root),
            engines: EngineCache::new(Arc::clone(&fs), settings.enable_engine_cache),
            fs,
            executor,
            state_store: None,
            state_generation: Mutex::new(0),
        }
    }

    /// Service configured from the project's `[engine]` section.
    pub fn for_project(
        fs: Arc<dyn FileSystem>,
        executor: Arc<dyn ProcessExecutor>,
        project: &ProjectModel,
    ) -> Self {
        let settings = project.cache_settings();
        let root = settings.resolved_root(&project.build_root());
        Self::new(fs, executor, &settings, root)
    }

    /// Use `store` instead of `<build_root>/buildplan.db`.
    pub fn with_state_store(mut self, store: Arc<dyn BuildStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn description_cache(&self) -> &DescriptionCache {
        &self.descriptions
    }

    pub fn engine_cache(&self) -> &EngineCache {
        &self.engines
    }

    fn state_store_for(&self, project: &ProjectModel) -> Arc<dyn BuildStateStore> {
        match &self.state_store {
            Some(store) => Arc::clone(store),
            None => Arc::new(FileStateStore::new(Arc::clone(&self.fs), project.state_db_path())),
        }
    }

    /// The session's database when nothing was saved since its last build,
    /// otherwise the store's. Returns the generation the database matches.
    fn load_state(
        &self,
        store: &dyn BuildStateStore,
        carried: Option<SessionState>,
    ) -> (BuildDatabase, Arc<FileCache>, u64) {
        let generation = lock(&self.state_generation);
        match carried {
            Some(state) if state.generation == *generation => {
                debug!(generation = state.generation, "using session build database");
                (state.db, state.files, state.generation)
            }
            carried => {
                let files = carried.map(|state| state.files).unwrap_or_default();
                let db = store.load().unwrap_or_else(|err| {
                    warn!(error = %err, "could not load build database; starting empty");
                    BuildDatabase::default()
                });
                (db, files, *generation)
            }
        }
    }

    /// Apply `changes` to the stored database and save it.
    fn save_state(
        &self,
        store: &dyn BuildStateStore,
        changes: &DatabaseChanges,
    ) -> Result<(BuildDatabase, u64)> {
        let mut generation = lock(&self.state_generation);
        let mut db = store.load()?;
        db.apply(changes);
        store.save(&db)?;
        *generation += 1;
        debug!(generation = *generation, tasks = changes.tasks.len(), "merged build database");
        Ok((db, *generation))
    }

    /// Look up the description for `request`, constructing and caching it
    /// on a miss.
    ///
    /// Descriptions with construction errors are returned but not cached.
    pub fn describe(&self, project: &ProjectModel, request: &BuildRequest) -> Result<RestoredDescription> {
        let builder = DescriptionBuilder::new(project, request, self.descriptions.root());
        let plan = builder.plan()?;

        if let Some(hit) = self.descriptions.get(&plan.signature) {
            info!(signature = %plan.signature, source = %hit.source, "reusing build description");
            return Ok(hit);
        }

        let description = Arc::new(builder.construct(&plan)?);
        if description.has_errors() {
            warn!(signature = %description.signature, "construction errors; description not cached");
        } else {
            self.descriptions.put(&description);
        }
        Ok(RestoredDescription {
            description,
            source: DescriptionSource::New,
        })
    }

    /// Run one build, reporting to `delegate`.
    ///
    /// Always brackets the event stream with `BuildStarted` and
    /// `BuildCompleted`. Planning and construction failures are reported as
    /// diagnostics and a failed status rather than an error.
    pub async fn build(
        &self,
        project: &ProjectModel,
        request: &BuildRequest,
        delegate: Arc<dyn BuildDelegate>,
    ) -> Result<BuildResult> {
        self.build_with_cancel(project, request, delegate, CancelHandle::new())
            .await
    }

    /// [`BuildService::build`], stoppable through `cancel`.
    pub async fn build_with_cancel(
        &self,
        project: &ProjectModel,
        request: &BuildRequest,
        delegate: Arc<dyn BuildDelegate>,
        cancel: CancelHandle,
    ) -> Result<BuildResult> {
        let sink = Arc::new(EventSink::new(delegate, 0));
        sink.emit(BuildEvent::BuildStarted);

        let restored = match self.describe(project, request) {
            Ok(restored) => restored,
            Err(err) => {
                warn!(error = %err, "build description could not be produced");
                sink.diagnostic(Diagnostic::error(err.to_string()));
                sink.emit(BuildEvent::BuildCompleted {
                    status: BuildStatus::Failed,
                });
                return Ok(BuildResult {
                    status: BuildStatus::Failed,
                    source: None,
                    description: None,
                    session: None,
                    executed: Vec::new(),
                    up_to_date: Vec::new(),
                    diagnostics: sink.diagnostics(),
                    progress: sink.progress(),
                    in_memory_cache_size: self.descriptions.in_memory_size(),
                });
            }
        };
        let description = Arc::clone(&restored.description);

        for diagnostic in &description.diagnostics {
            sink.diagnostic(diagnostic.clone());
        }

        // A reconstructed description was never validated by a session.
        if restored.source == DescriptionSource::New {
            self.engines.clear(&description.artifacts.manifest);
        }
        let (session, reuse) = self.engines.checkout(&description);
        match &reuse {
            SessionReuse::Reused => debug!(signature = %description.signature, "execution session reused"),
            SessionReuse::Created { reason } => {
                debug!(signature = %description.signature, %reason, "execution session created")
            }
        }
        let EngineSession {
            manifest_path,
            manifest_hash,
            signature,
            scheduler,
            max_task_count,
            state,
        } = session;
        sink.set_max(max_task_count);

        let store = self.state_store_for(project);
        let (db, files, generation) = self.load_state(store.as_ref(), state);

        let decisions = Arc::new(DecisionEngine::new(
            Arc::clone(&self.fs),
            Arc::clone(&description),
            db,
            Arc::clone(&files),
            request.use_dry_run,
        ));
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&self.fs),
            Arc::clone(&description),
            Arc::clone(&decisions),
            Arc::clone(&self.executor),
            Arc::clone(&sink),
            request.use_dry_run,
        ));

        let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
        let backend = TaskExecutorBackend::new(Arc::clone(&runner), tx.clone());
        // Queued ahead of every completion when cancelled before the run.
        let forwarder = if cancel.is_cancelled() {
            let _ = tx.send(RuntimeEvent::CancelRequested).await;
            None
        } else {
            Some(tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = tx.send(RuntimeEvent::CancelRequested).await;
            }))
        };

        let options = RuntimeOptions::new(project.engine.jobs, request.continue_building_after_errors);
        let core = CoreRuntime::new(scheduler, options);
        let runtime = Runtime::new(core, rx, backend, Arc::clone(&description), Arc::clone(&sink));
        let outcome = runtime.run(&description.pre_failed_tasks()).await;
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        let changes = decisions.changes_snapshot();
        let carried = if request.use_dry_run || changes.is_empty() {
            Some((decisions.snapshot(), generation))
        } else {
            match self.save_state(store.as_ref(), &changes) {
                Ok(saved) => Some(saved),
                Err(err) => {
                    warn!(error = %err, "could not store build database");
                    sink.diagnostic(Diagnostic::warning(format!("could not store build database: {err}")));
                    None
                }
            }
        };

        let mut status = match outcome {
            Ok(core) => {
                let status = core.status();
                self.engines.checkin(EngineSession {
                    manifest_path,
                    manifest_hash,
                    signature,
                    scheduler: core.into_scheduler(),
                    max_task_count,
                    state: carried.map(|(db, generation)| SessionState {
                        db,
                        generation,
                        files,
                    }),
                });
                status
            }
            Err(err) => {
                warn!(error = %err, "runtime failed");
                sink.diagnostic(Diagnostic::error(err.to_string()));
                self.engines.clear(&manifest_path);
                BuildStatus::Failed
            }
        };
        if status == BuildStatus::Succeeded && description.has_errors() {
            status = BuildStatus::Failed;
        }

        sink.emit(BuildEvent::BuildCompleted { status });
        let ExecutionLog {
            executed,
            up_to_date,
        } = runner.log();
        info!(
            %status,
            source = %restored.source,
            executed = executed.len(),
            up_to_date = up_to_date.len(),
            "build finished"
        );

        Ok(BuildResult {
            status,
            source: Some(restored.source),
            description: Some(description),
            session: Some(reuse),
            executed,
            up_to_date,
            diagnostics: sink.diagnostics(),
            progress: sink.progress(),
            in_memory_cache_size: self.descriptions.in_memory_size(),
        })
    }
}
