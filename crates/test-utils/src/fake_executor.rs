use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use buildplan::exec::{ProcessExecutor, ProcessOutput, ProcessRequest};
use buildplan::fs::FileSystem;

/// Custom behaviour for one rule. Returns whether the "process" succeeded.
pub type Behaviour = Arc<dyn Fn(&dyn FileSystem, &ProcessRequest) -> anyhow::Result<bool> + Send + Sync>;

/// A fake process executor that:
/// - records every request it receives, in order
/// - by default writes each output that is not an existing directory as
///   the rule followed by the contents of its file inputs, then reports
///   success.
pub struct FakeProcessExecutor {
    fs: Arc<dyn FileSystem>,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    invocations: Mutex<Vec<ProcessRequest>>,
}

impl fmt::Debug for FakeProcessExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeProcessExecutor")
            .field("invocations", &self.invocations.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl FakeProcessExecutor {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            behaviours: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Replace the default behaviour for the task whose rule is `rule`.
    pub fn on<F>(&self, rule: &str, behaviour: F)
    where
        F: Fn(&dyn FileSystem, &ProcessRequest) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.behaviours
            .lock()
            .unwrap()
            .insert(rule.to_string(), Arc::new(behaviour));
    }

    /// Make `rule` exit unsuccessfully without touching its outputs.
    pub fn fail(&self, rule: &str) {
        self.on(rule, |_, _| Ok(false));
    }

    /// Rule displays of every request, in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(ProcessRequest::rule_display)
            .collect()
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count(&self, rule: &str) -> usize {
        self.invocations().iter().filter(|r| r.as_str() == rule).count()
    }

    pub fn clear(&self) {
        self.invocations.lock().unwrap().clear();
    }

    fn produce(&self, request: &ProcessRequest) -> anyhow::Result<bool> {
        let mut contents = request.rule_display().into_bytes();
        contents.push(b'\n');
        for input in &request.inputs {
            if self.fs.is_file(input) {
                contents.extend(self.fs.read(input)?);
            }
        }
        for output in &request.outputs {
            if !self.fs.is_dir(output) {
                self.fs.write(output, &contents)?;
            }
        }
        Ok(true)
    }
}

impl ProcessExecutor for FakeProcessExecutor {
    fn execute<'a>(
        &'a self,
        request: &'a ProcessRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProcessOutput>> + Send + 'a>> {
        Box::pin(async move {
            self.invocations.lock().unwrap().push(request.clone());

            let behaviour = self
                .behaviours
                .lock()
                .unwrap()
                .get(&request.rule_display())
                .cloned();
            let success = match behaviour {
                Some(behaviour) => behaviour(self.fs.as_ref(), request)?,
                None => self.produce(request)?,
            };

            Ok(ProcessOutput {
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}
