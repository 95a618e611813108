//! In-memory job store.
//!
//! Nothing survives a restart. Logs are not retained either; every job
//! logger writes straight through to a shared writer (stdout by default).

use async_trait::async_trait;
use dockhand_core::executor::OutputSink;
use dockhand_core::store::{JobLogger, JobStore};
use dockhand_core::{Error, Job, JobId, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;

type ScopeKey = (String, String, String);

#[derive(Default)]
struct MemoryState {
    last_id: u64,
    /// Last number handed out per (owner, repo, branch).
    sequences: HashMap<ScopeKey, u64>,
    jobs: BTreeMap<JobId, Job>,
}

/// Job store held entirely in process memory.
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    log: WriterLogger,
}

impl MemoryJobStore {
    /// A store whose job logs go to stdout.
    pub fn new() -> Self {
        Self::with_log_writer(WriterLogger::stdout())
    }

    /// A store whose job logs all go to `log`.
    pub fn with_log_writer(log: WriterLogger) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            log,
        }
    }

    fn scope_key(owner: &str, repo: &str, branch: &str) -> ScopeKey {
        (owner.to_string(), repo.to_string(), branch.to_string())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &mut Job) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(id) = job.id {
            let slot = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
            *slot = job.clone();
            return Ok(());
        }

        state.last_id += 1;
        let id = JobId::new(state.last_id);
        let number = {
            let counter = state
                .sequences
                .entry(Self::scope_key(&job.owner, &job.repo, &job.branch))
                .or_insert(0);
            *counter += 1;
            *counter
        };

        job.id = Some(id);
        job.number = Some(number);
        state.jobs.insert(id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Job> {
        self.state
            .lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    async fn get_by_number(&self, owner: &str, repo: &str, branch: &str, number: u64) -> Result<Job> {
        self.state
            .lock()
            .jobs
            .values()
            .find(|j| {
                j.owner == owner && j.repo == repo && j.branch == branch && j.number == Some(number)
            })
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("job {}/{}@{}#{}", owner, repo, branch, number))
            })
    }

    async fn list(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|j| j.owner == owner && j.repo == repo && j.branch == branch)
            .cloned()
            .collect();

        if jobs.is_empty() {
            return Err(Error::NotFound(format!(
                "jobs for {}/{}@{}",
                owner, repo, branch
            )));
        }
        jobs.sort_by(|a, b| b.number.cmp(&a.number));
        Ok(jobs)
    }

    async fn list_owners(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let owners: BTreeSet<&String> = state.jobs.values().map(|j| &j.owner).collect();
        Ok(owners.into_iter().cloned().collect())
    }

    async fn list_repos(&self, owner: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        let repos: BTreeSet<&String> = state
            .jobs
            .values()
            .filter(|j| j.owner == owner)
            .map(|j| &j.repo)
            .collect();
        Ok(repos.into_iter().cloned().collect())
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        let branches: BTreeSet<&String> = state
            .jobs
            .values()
            .filter(|j| j.owner == owner && j.repo == repo)
            .map(|j| &j.branch)
            .collect();
        Ok(branches.into_iter().cloned().collect())
    }

    fn logger(&self, job: &Job) -> Result<Arc<dyn JobLogger>> {
        job.require_locator()?;
        Ok(Arc::new(self.log.clone()))
    }
}

/// Job logger that forwards every chunk to a writer and retains nothing.
#[derive(Clone)]
pub struct WriterLogger {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl WriterLogger {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl OutputSink for WriterLogger {
    async fn write(&self, chunk: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(chunk)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::Storage(format!("failed to write job log: {}", e)))
    }
}

#[async_trait]
impl JobLogger for WriterLogger {
    async fn replay(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
