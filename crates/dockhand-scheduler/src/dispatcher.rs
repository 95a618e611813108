//! Job dispatcher - numbers build requests and spawns one task per job.

use dockhand_core::executor::Executor;
use dockhand_core::source::SourceProvider;
use dockhand_core::store::JobStore;
use dockhand_core::{Job, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::orchestrator::JobRequest;

/// An external request to build a repository revision.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobTrigger {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl JobTrigger {
    /// Build the head of the default branch.
    pub fn default_branch(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn branch(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default_branch(owner, repo)
        }
    }

    pub fn commit(owner: impl Into<String>, repo: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            commit: Some(sha.into()),
            ..Self::default_branch(owner, repo)
        }
    }
}

/// Shared collaborators for every job, constructed once at startup.
#[derive(Clone)]
pub struct JobDispatcher {
    executor: Arc<dyn Executor>,
    store: Arc<dyn JobStore>,
    source: Arc<dyn SourceProvider>,
}

impl JobDispatcher {
    pub fn new(
        executor: Arc<dyn Executor>,
        store: Arc<dyn JobStore>,
        source: Arc<dyn SourceProvider>,
    ) -> Self {
        Self {
            executor,
            store,
            source,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create and number a job, then run it on its own task.
    ///
    /// Returns the numbered job as saved before the pipeline starts, and the
    /// handle of the task that resolves to the finished job.
    pub async fn submit(&self, trigger: JobTrigger) -> Result<(Job, JoinHandle<Job>)> {
        let mut job = Job::new(trigger.owner, trigger.repo, trigger.branch, trigger.commit);
        self.store.save(&mut job).await?;

        if let Some(locator) = job.locator() {
            info!(job = %locator, "Queued job");
        }

        let request = JobRequest::new(
            job.clone(),
            self.executor.clone(),
            self.store.clone(),
            self.source.clone(),
        );
        let handle = tokio::spawn(request.run());
        Ok((job, handle))
    }
}
