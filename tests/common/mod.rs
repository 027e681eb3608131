#![allow(dead_code)]

pub use buildplan_test_utils::builders::{ProjectBuilder, TargetBuilder, TaskSpecBuilder};
pub use buildplan_test_utils::counting_fs::CountingFileSystem;
pub use buildplan_test_utils::delegate::RecordingDelegate;
pub use buildplan_test_utils::fake_executor::FakeProcessExecutor;
pub use buildplan_test_utils::{init_tracing, with_timeout};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use buildplan::config::ProjectModel;
use buildplan::engine::{BuildResult, BuildService, CancelHandle};
use buildplan::fs::{FileSystem, RealFileSystem};
use buildplan::types::{BuildParameters, BuildRequest};

/// A project rooted in a temporary directory, built through a
/// `BuildService` backed by the real filesystem and a fake executor.
pub struct Harness {
    pub dir: TempDir,
    pub fs: Arc<dyn FileSystem>,
    pub project: ProjectModel,
    pub executor: Arc<FakeProcessExecutor>,
    pub service: BuildService,
}

impl Harness {
    pub fn new(builder: ProjectBuilder) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_fs(builder, Arc::new(RealFileSystem))
    }

    /// Like `new`, but every component goes through `fs`.
    pub fn with_fs(
        builder: ProjectBuilder,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let project = builder.build_in(dir.path())?;
        let executor = Arc::new(FakeProcessExecutor::new(Arc::clone(&fs)));
        let service = BuildService::for_project(Arc::clone(&fs), executor.clone(), &project);
        Ok(Self {
            dir,
            fs,
            project,
            executor,
            service,
        })
    }

    /// Drop all in-process state, as if the tool was started again.
    pub fn restart(&mut self) {
        self.service =
            BuildService::for_project(Arc::clone(&self.fs), self.executor.clone(), &self.project);
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        self.fs
            .write(&self.path(rel), contents.as_bytes())
            .expect("write test file");
    }

    pub fn read(&self, rel: &str) -> String {
        self.fs.read_to_string(&self.path(rel)).expect("read test file")
    }

    /// Move the mtime of `rel` an hour forward without touching its bytes.
    pub fn bump_mtime(&self, rel: &str) {
        let later = SystemTime::now() + Duration::from_secs(3600);
        self.fs
            .set_modified(&self.path(rel), later)
            .expect("set mtime");
    }

    /// Move the mtime of `rel` an hour back without touching its bytes.
    pub fn backdate(&self, rel: &str) {
        let earlier = SystemTime::now() - Duration::from_secs(3600);
        self.fs
            .set_modified(&self.path(rel), earlier)
            .expect("set mtime");
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.fs.exists(&self.path(rel))
    }

    pub async fn build(&self, request: &BuildRequest) -> (BuildResult, Arc<RecordingDelegate>) {
        let delegate = Arc::new(RecordingDelegate::new());
        self.executor.clear();
        let result = with_timeout(self.service.build(&self.project, request, delegate.clone()))
            .await
            .expect("build should not error");
        (result, delegate)
    }

    /// Build with a caller-owned cancel handle, leaving executor records alone.
    pub async fn build_with_cancel(
        &self,
        request: &BuildRequest,
        cancel: CancelHandle,
    ) -> (BuildResult, Arc<RecordingDelegate>) {
        let delegate = Arc::new(RecordingDelegate::new());
        let result = with_timeout(self.service.build_with_cancel(
            &self.project,
            request,
            delegate.clone(),
            cancel,
        ))
        .await
        .expect("build should not error");
        (result, delegate)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Request for `targets` (all targets when empty) in the Debug configuration.
pub fn request(targets: &[&str]) -> BuildRequest {
    BuildRequest::new(targets.iter().copied(), BuildParameters::new("Debug"))
}
