// src/incremental/decision.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::dag::task::{NodeRole, Task};
use crate::description::BuildDescription;
use crate::errors::{BuildError, Result};
use crate::fs::FileSystem;
use crate::incremental::file_cache::FileCache;
use crate::incremental::hash::{compute_directory_signature, node_signature};
use crate::incremental::store::{BuildDatabase, DatabaseChanges, TaskRecord};

/// Why a task must run, or that it need not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    UpToDate,
    /// The task declares no outputs.
    AlwaysOutOfDate,
    NeverBuilt,
    /// Command line, environment or another definition field changed.
    DefinitionChanged,
    InputChanged(PathBuf),
    OutputMissing(PathBuf),
    /// An output no longer has the content its last writer left behind.
    OutputModified(PathBuf),
}

impl Verdict {
    pub fn needs_run(&self) -> bool {
        *self != Verdict::UpToDate
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::UpToDate => write!(f, "up to date"),
            Verdict::AlwaysOutOfDate => write!(f, "no declared outputs"),
            Verdict::NeverBuilt => write!(f, "never built"),
            Verdict::DefinitionChanged => write!(f, "definition changed"),
            Verdict::InputChanged(p) => write!(f, "input {:?} changed", p),
            Verdict::OutputMissing(p) => write!(f, "output {:?} missing", p),
            Verdict::OutputModified(p) => write!(f, "output {:?} modified", p),
        }
    }
}

/// A verdict plus the input signatures it was based on.
#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub input_signatures: BTreeMap<PathBuf, String>,
}

/// Per-build decision state over a description and the recorded database.
///
/// The file cache is shared with the execution session, so hashes survive
/// into the next build of the same manifest.
#[derive(Debug)]
pub struct DecisionEngine {
    fs: Arc<dyn FileSystem>,
    files: Arc<FileCache>,
    description: Arc<BuildDescription>,
    db: Mutex<BuildDatabase>,
    /// What this build wrote into `db`, locked after `db`.
    changes: Mutex<DatabaseChanges>,
    /// Every path some task in the plan produces.
    produced: BTreeSet<PathBuf>,
    /// Writers of each file path, in plan order.
    writers: BTreeMap<PathBuf, Vec<String>>,
    /// Keys of tasks that ran (or would have) in this build.
    ran: Mutex<BTreeSet<String>>,
    dry_run: bool,
}

impl DecisionEngine {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        description: Arc<BuildDescription>,
        db: BuildDatabase,
        files: Arc<FileCache>,
        dry_run: bool,
    ) -> Self {
        let produced = description
            .tasks
            .iter()
            .flat_map(|t| t.outputs.iter())
            .filter(|n| !n.is_virtual())
            .map(|n| n.path.clone())
            .collect();
        let mut writers: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        for task in &description.tasks {
            for output in task.outputs.iter().filter(|o| o.role == NodeRole::File) {
                writers.entry(output.path.clone()).or_default().push(task.key.clone());
            }
        }
        Self {
            fs,
            files,
            description,
            db: Mutex::new(db),
            changes: Mutex::new(DatabaseChanges::default()),
            produced,
            writers,
            ran: Mutex::new(BTreeSet::new()),
            dry_run,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BuildDatabase> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn changes(&self) -> MutexGuard<'_, DatabaseChanges> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Note that `task` is about to run in this build.
    pub fn mark_ran(&self, task: &Task) {
        self.ran
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.key.clone());
    }

    /// Whether a writer of `path` declared before `task` ran in this build.
    fn earlier_writer_ran(&self, task: &Task, path: &Path) -> bool {
        let Some(writers) = self.writers.get(path) else {
            return false;
        };
        let ran = self.ran.lock().unwrap_or_else(PoisonError::into_inner);
        writers
            .iter()
            .take_while(|key| **key != task.key)
            .any(|key| ran.contains(key))
    }

    fn stamp_for(&self, path: &Path, role: NodeRole) -> Option<&str> {
        match role {
            NodeRole::DirectoryTree => self.description.directory_stamp(path),
            _ => None,
        }
    }

    /// Decide whether `task` must run.
    ///
    /// Fails with [`BuildError::MissingInput`] when a declared input does
    /// not exist. During a dry run an input that some task in the plan
    /// would produce counts as changed instead.
    pub fn decide(&self, task: &Task) -> Result<Decision> {
        let mut input_signatures = BTreeMap::new();
        let mut pending_input = None;
        for input in &task.inputs {
            let stamp = self.stamp_for(&input.path, input.role);
            match node_signature(self.fs.as_ref(), &self.files, input, stamp)? {
                Some(sig) => {
                    input_signatures.insert(input.path.clone(), sig);
                }
                None if self.dry_run && self.produced.contains(&input.path) => {
                    pending_input.get_or_insert_with(|| input.path.clone());
                }
                None => {
                    return Err(BuildError::MissingInput {
                        path: input.path.clone(),
                        rule_info: task.rule_display(),
                    });
                }
            }
        }

        let verdict = match pending_input {
            Some(path) => Verdict::InputChanged(path),
            None => self.verdict_for(task, &input_signatures)?,
        };
        debug!(task = %task.rule_display(), verdict = %verdict, "decided");
        Ok(Decision {
            verdict,
            input_signatures,
        })
    }

    fn verdict_for(&self, task: &Task, inputs: &BTreeMap<PathBuf, String>) -> Result<Verdict> {
        if task.always_out_of_date() {
            return Ok(Verdict::AlwaysOutOfDate);
        }
        let db = self.lock();
        let Some(record) = db.tasks.get(&task.state_key()) else {
            return Ok(Verdict::NeverBuilt);
        };
        if record.task_signature != task.signature {
            return Ok(Verdict::DefinitionChanged);
        }
        for (path, sig) in inputs {
            // A path rewritten in place is judged by its writer chain: later
            // mutators change its bytes after this task recorded them.
            if task.mutates(path) {
                if self.earlier_writer_ran(task, path) {
                    return Ok(Verdict::InputChanged(path.clone()));
                }
                continue;
            }
            if record.inputs.get(path) != Some(sig) {
                return Ok(Verdict::InputChanged(path.clone()));
            }
        }
        if let Some(path) = record.inputs.keys().find(|p| !inputs.contains_key(*p)) {
            return Ok(Verdict::InputChanged(path.clone()));
        }

        let expected: Vec<(PathBuf, Option<String>)> = task
            .outputs
            .iter()
            .filter(|o| !o.is_virtual())
            .map(|o| {
                let last = db
                    .nodes
                    .get(&o.path)
                    .or_else(|| record.outputs.get(&o.path))
                    .cloned();
                (o.path.clone(), last)
            })
            .collect();
        drop(db);

        for (output, (path, last)) in task.outputs.iter().filter(|o| !o.is_virtual()).zip(expected) {
            match node_signature(self.fs.as_ref(), &self.files, output, None)? {
                None => return Ok(Verdict::OutputMissing(path)),
                Some(current) if Some(&current) != last.as_ref() => {
                    return Ok(Verdict::OutputModified(path));
                }
                Some(_) => {}
            }
        }
        Ok(Verdict::UpToDate)
    }

    /// Record a successful execution of `task`.
    ///
    /// Inputs the task writes into are re-read, so a mutator does not see
    /// its own change as an input change next time. The outputs become the
    /// last-written signature of their paths, and every recorded directory
    /// enclosing one of them is refreshed.
    pub fn record_success(&self, task: &Task, decision: &Decision) -> Result<()> {
        let mut inputs = decision.input_signatures.clone();
        for input in task.inputs.iter().filter(|i| task.writes_into(i)) {
            let stamp = self.stamp_for(&input.path, input.role);
            if let Some(sig) = node_signature(self.fs.as_ref(), &self.files, input, stamp)? {
                inputs.insert(input.path.clone(), sig);
            }
        }

        let mut outputs = BTreeMap::new();
        for output in task.outputs.iter().filter(|o| !o.is_virtual()) {
            match node_signature(self.fs.as_ref(), &self.files, output, None)? {
                Some(sig) => {
                    outputs.insert(output.path.clone(), sig);
                }
                None => {
                    warn!(task = %task.rule_display(), path = ?output.path, "task succeeded without producing a declared output");
                }
            }
        }

        // Held while refreshing so concurrent writers into one directory
        // record in completion order.
        let mut db = self.lock();
        let enclosing: Vec<PathBuf> = db
            .nodes
            .keys()
            .filter(|dir| outputs.keys().any(|o| o != *dir && o.starts_with(dir)) && self.fs.is_dir(dir))
            .cloned()
            .collect();
        let mut changes = self.changes();
        for dir in enclosing {
            let sig = compute_directory_signature(self.fs.as_ref(), &self.files, &dir, &[], None)?;
            db.nodes.insert(dir.clone(), sig.clone());
            changes.nodes.insert(dir, sig);
        }
        for (path, sig) in &outputs {
            db.nodes.insert(path.clone(), sig.clone());
            changes.nodes.insert(path.clone(), sig.clone());
        }
        let record = TaskRecord {
            task_signature: task.signature.clone(),
            inputs,
            outputs,
        };
        db.tasks.insert(task.state_key(), record.clone());
        changes.tasks.insert(task.state_key(), Some(record));
        Ok(())
    }

    /// Forget `task` so it runs again next build.
    pub fn record_failure(&self, task: &Task) {
        let mut db = self.lock();
        db.tasks.remove(&task.state_key());
        self.changes().tasks.insert(task.state_key(), None);
    }

    /// Drop memoized hashes for everything `task` may have written.
    pub fn invalidate_outputs(&self, task: &Task) {
        for output in task.outputs.iter().filter(|o| !o.is_virtual()) {
            self.files.invalidate_tree(&output.path);
        }
    }

    pub fn snapshot(&self) -> BuildDatabase {
        self.lock().clone()
    }

    /// Everything recorded during this build.
    pub fn changes_snapshot(&self) -> DatabaseChanges {
        let _db = self.lock();
        self.changes().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;
    use crate::description::DescriptionBuilder;
    use crate::fs::mock::MockFileSystem;
    use crate::types::{BuildParameters, BuildRequest};
    use std::time::{Duration, SystemTime};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const PROJECT: &str = r#"
[target.App]
[[target.App.phase]]
name = "sources"
[[target.App.phase.task]]
rule = ["Compile", "main.o"]
tool = "cc"
command = ["cc", "-c", "main.c"]
inputs = ["main.c"]
outputs = ["build/main.o"]
"#;

    fn engine(fs: &Arc<MockFileSystem>, db: BuildDatabase) -> Result<(DecisionEngine, Arc<Task>)> {
        let project = load_from_str(PROJECT, "/p")?;
        let request = BuildRequest::new(["App"], BuildParameters::new("Debug"));
        let builder = DescriptionBuilder::new(&project, &request, "/p/build/BuildDescriptions");
        let description = Arc::new(builder.construct(&builder.plan()?)?);
        let task = description
            .task_by_rule("Compile main.o")
            .cloned()
            .ok_or_else(|| BuildError::TaskNotFound("Compile main.o".into()))?;
        let files = Arc::new(FileCache::new());
        Ok((DecisionEngine::new(fs.clone(), description, db, files, false), task))
    }

    #[test]
    fn mtime_only_change_is_up_to_date() -> TestResult {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("/p/main.c", "int main;");

        let (first, task) = engine(&fs, BuildDatabase::default())?;
        let decision = first.decide(&task)?;
        assert_eq!(decision.verdict, Verdict::NeverBuilt);
        fs.add_file("/p/build/main.o", "obj");
        first.record_success(&task, &decision)?;
        let db = first.snapshot();

        fs.set_modified(Path::new("/p/main.c"), SystemTime::now() + Duration::from_secs(60))?;
        let (second, task) = engine(&fs, db.clone())?;
        assert_eq!(second.decide(&task)?.verdict, Verdict::UpToDate);

        fs.add_file("/p/main.c", "int main(void);");
        let (third, task) = engine(&fs, db.clone())?;
        assert_eq!(
            third.decide(&task)?.verdict,
            Verdict::InputChanged(PathBuf::from("/p/main.c"))
        );

        fs.add_file("/p/main.c", "int main;");
        fs.remove_file(Path::new("/p/build/main.o"))?;
        let (fourth, task) = engine(&fs, db)?;
        assert_eq!(
            fourth.decide(&task)?.verdict,
            Verdict::OutputMissing(PathBuf::from("/p/build/main.o"))
        );
        Ok(())
    }

    #[test]
    fn changes_hold_only_what_this_build_recorded() -> TestResult {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("/p/main.c", "int main;");
        let mut older = BuildDatabase::default();
        older.nodes.insert(PathBuf::from("/p/other.o"), "h".into());

        let (engine, task) = engine(&fs, older)?;
        assert!(engine.changes_snapshot().is_empty());
        let decision = engine.decide(&task)?;
        fs.add_file("/p/build/main.o", "obj");
        engine.record_success(&task, &decision)?;

        let changes = engine.changes_snapshot();
        assert!(matches!(changes.tasks.get(&task.state_key()), Some(Some(_))));
        assert!(changes.nodes.contains_key(Path::new("/p/build/main.o")));
        assert!(!changes.nodes.contains_key(Path::new("/p/other.o")));

        engine.record_failure(&task);
        assert!(matches!(engine.changes_snapshot().tasks.get(&task.state_key()), Some(None)));
        Ok(())
    }

    #[test]
    fn missing_input_names_path_and_rule() -> TestResult {
        let fs = Arc::new(MockFileSystem::new());
        let (engine, task) = engine(&fs, BuildDatabase::default())?;
        match engine.decide(&task) {
            Err(BuildError::MissingInput { path, rule_info }) => {
                assert_eq!(path, PathBuf::from("/p/main.c"));
                assert_eq!(rule_info, "Compile main.o");
            }
            other => panic!("expected missing input, got {other:?}"),
        }
        Ok(())
    }
}
