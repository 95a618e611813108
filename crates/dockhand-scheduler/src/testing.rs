//! Test doubles for the orchestrator's collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use dockhand_config::CONFIG_FILE;
use dockhand_core::executor::{ContainerHandle, ContainerSpec, Executor, OutputSink};
use dockhand_core::source::SourceProvider;
use dockhand_core::store::{JobLogger, JobStore};
use dockhand_core::{Error, Job, JobId, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Run(ContainerSpec),
    Attach(ContainerHandle),
    Wait(ContainerHandle),
    Kill(ContainerHandle),
    Build,
}

#[derive(Default)]
struct StubExecutorState {
    calls: Vec<ExecutorCall>,
    started: HashMap<String, ContainerSpec>,
}

/// Executor that starts nothing and records every call.
///
/// A container whose command reads the build definition writes the
/// configured definition to stdout; every other container writes one line
/// naming its image. Exit codes default to 0.
#[derive(Clone)]
pub struct StubExecutor {
    inner: Arc<Mutex<StubExecutorState>>,
    config: Bytes,
    exit_codes: HashMap<String, i64>,
    failing_images: HashSet<String>,
    failing_attach: HashSet<String>,
}

impl StubExecutor {
    /// Stub whose sources contain `config` as the build definition.
    pub fn new(config: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StubExecutorState::default())),
            config: config.into(),
            exit_codes: HashMap::new(),
            failing_images: HashSet::new(),
            failing_attach: HashSet::new(),
        }
    }

    /// Containers running `image` exit with `code`.
    pub fn with_exit_code(mut self, image: impl Into<String>, code: i64) -> Self {
        self.exit_codes.insert(image.into(), code);
        self
    }

    /// Starting a container from `image` fails.
    pub fn failing_on(mut self, image: impl Into<String>) -> Self {
        self.failing_images.insert(image.into());
        self
    }

    /// Attaching to a container started from `image` fails.
    pub fn failing_attach_on(mut self, image: impl Into<String>) -> Self {
        self.failing_attach.insert(image.into());
        self
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.inner.lock().calls.clone()
    }

    /// Specs of every `run` call, including ones that failed.
    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExecutorCall::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Handles passed to `kill`.
    pub fn kills(&self) -> Vec<ContainerHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExecutorCall::Kill(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.count(|c| matches!(c, ExecutorCall::Attach(_)))
    }

    pub fn wait_count(&self) -> usize {
        self.count(|c| matches!(c, ExecutorCall::Wait(_)))
    }

    /// Number of `run` calls for `image`.
    pub fn runs_of(&self, image: &str) -> usize {
        self.runs().iter().filter(|s| s.image == image).count()
    }

    fn count(&self, pred: impl Fn(&ExecutorCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn started_spec(&self, handle: &ContainerHandle) -> Result<ContainerSpec> {
        self.inner
            .lock()
            .started
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no such container: {}", handle.name)))
    }
}

#[async_trait]
impl Executor for StubExecutor {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let mut state = self.inner.lock();
        state.calls.push(ExecutorCall::Run(spec.clone()));

        if self.failing_images.contains(&spec.image) {
            return Err(Error::Transport(format!("cannot start {}", spec.image)));
        }

        let n = state.started.len() + 1;
        let handle = ContainerHandle {
            id: format!("stub-{}", n),
            name: format!("stub-container-{}", n),
        };
        state.started.insert(handle.id.clone(), spec);
        Ok(handle)
    }

    async fn attach(
        &self,
        handle: &ContainerHandle,
        stdout: &dyn OutputSink,
        _stderr: &dyn OutputSink,
    ) -> Result<()> {
        self.inner
            .lock()
            .calls
            .push(ExecutorCall::Attach(handle.clone()));

        let spec = self.started_spec(handle)?;
        if self.failing_attach.contains(&spec.image) {
            return Err(Error::Transport(format!("attach to {} dropped", handle.name)));
        }
        if spec.cmd.iter().any(|arg| arg == CONFIG_FILE) {
            stdout.write(&self.config).await
        } else {
            stdout
                .write(format!("running {}\n", spec.image).as_bytes())
                .await
        }
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64> {
        self.inner.lock().calls.push(ExecutorCall::Wait(handle.clone()));
        let spec = self.started_spec(handle)?;
        Ok(self.exit_codes.get(&spec.image).copied().unwrap_or(0))
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<()> {
        self.inner.lock().calls.push(ExecutorCall::Kill(handle.clone()));
        Ok(())
    }

    async fn build(&self, _context: Bytes, output: &dyn OutputSink) -> Result<String> {
        self.inner.lock().calls.push(ExecutorCall::Build);
        output.write(b"Successfully built stub\n").await?;
        Ok("stub-image".to_string())
    }
}

/// Source provider with a fixed head commit.
pub struct StubSource {
    sha: Option<String>,
    resolves: AtomicUsize,
}

impl StubSource {
    /// Every branch resolves to `sha`.
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: Some(sha.into()),
            resolves: AtomicUsize::new(0),
        }
    }

    /// Every branch lookup fails.
    pub fn unreachable() -> Self {
        Self {
            sha: None,
            resolves: AtomicUsize::new(0),
        }
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for StubSource {
    async fn resolve_commit(&self, owner: &str, repo: &str, branch: &str) -> Result<String> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.sha.clone().ok_or_else(|| {
            Error::Transport(format!("cannot resolve {}/{}@{}", owner, repo, branch))
        })
    }

    async fn clone_url(&self, owner: &str, repo: &str) -> Result<String> {
        Ok(format!("https://git.example.com/{}/{}.git", owner, repo))
    }
}

/// Job store wrapper that counts saves and can fail re-saves on demand.
pub struct CountingStore {
    inner: Arc<dyn JobStore>,
    saves: AtomicUsize,
    fail_updates_after: Option<usize>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn JobStore>) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
            fail_updates_after: None,
        }
    }

    /// Saves of already-numbered jobs fail once `n` saves have succeeded.
    pub fn failing_updates_after(mut self, n: usize) -> Self {
        self.fail_updates_after = Some(n);
        self
    }

    /// Number of `save` calls, successful or not.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn save(&self, job: &mut Job) -> Result<()> {
        let previous = self.saves.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_updates_after {
            if job.id.is_some() && previous >= limit {
                return Err(Error::Storage("disk full".to_string()));
            }
        }
        self.inner.save(job).await
    }

    async fn get_by_id(&self, id: JobId) -> Result<Job> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_number(&self, owner: &str, repo: &str, branch: &str, number: u64) -> Result<Job> {
        self.inner.get_by_number(owner, repo, branch, number).await
    }

    async fn list(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<Job>> {
        self.inner.list(owner, repo, branch).await
    }

    async fn list_owners(&self) -> Result<Vec<String>> {
        self.inner.list_owners().await
    }

    async fn list_repos(&self, owner: &str) -> Result<Vec<String>> {
        self.inner.list_repos(owner).await
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        self.inner.list_branches(owner, repo).await
    }

    fn logger(&self, job: &Job) -> Result<Arc<dyn JobLogger>> {
        self.inner.logger(job)
    }
}
