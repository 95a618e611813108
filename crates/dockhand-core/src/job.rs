//! Job records and build-definition types.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, JobId, Result};

/// Branch used when a job is requested with neither a branch nor a commit.
pub const DEFAULT_BRANCH: &str = "master";

/// One build/release attempt for a repository revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Global identifier, assigned on first save.
    pub id: Option<JobId>,
    /// Position within the (owner, repo, branch) scope, assigned on first save.
    pub number: Option<u64>,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Commit being built. Resolved from the branch head when not given.
    pub sha: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Only meaningful once `ended_at` is set.
    pub success: bool,
}

impl Job {
    /// Create an unsaved job that starts now.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: Option<String>,
        sha: Option<String>,
    ) -> Self {
        let branch = match (branch, &sha) {
            (Some(branch), _) => branch,
            (None, None) => DEFAULT_BRANCH.to_string(),
            (None, Some(_)) => String::new(),
        };

        Self {
            id: None,
            number: None,
            owner: owner.into(),
            repo: repo.into(),
            branch,
            sha,
            started_at: Utc::now(),
            ended_at: None,
            success: false,
        }
    }

    /// Where this job is stored, once it has been numbered.
    pub fn locator(&self) -> Option<JobLocator> {
        self.number.map(|number| JobLocator {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            number,
        })
    }

    /// Like [`Job::locator`], but a job that was never saved is an error.
    pub fn require_locator(&self) -> Result<JobLocator> {
        self.locator().ok_or_else(|| {
            Error::Storage(format!(
                "job {}/{}@{} has not been saved",
                self.owner, self.repo, self.branch
            ))
        })
    }

    /// Record the resolved commit. A commit that is already set never changes.
    pub fn resolve_sha(&mut self, sha: impl Into<String>) -> &str {
        self.sha.get_or_insert_with(|| sha.into())
    }

    /// Mark the job as finished. `ended_at` never precedes `started_at`.
    pub fn finish(&mut self, success: bool) {
        self.ended_at = Some(Utc::now().max(self.started_at));
        self.success = success;
    }
}

/// The (owner, repo, branch, number) tuple identifying where a job is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{owner}/{repo}@{branch}#{number}")]
pub struct JobLocator {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub number: u64,
}

/// Job configuration read from the project's build-definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub build: ContainerConfig,
    pub release: Option<ContainerConfig>,
    /// Service containers keyed by the alias they are linked under.
    pub services: BTreeMap<String, ContainerConfig>,
    /// Link each service to the services started before it.
    pub link_services: bool,
}

impl JobConfig {
    /// The release stage, if one is configured with an image.
    pub fn release_stage(&self) -> Option<&ContainerConfig> {
        self.release.as_ref().filter(|r| !r.image.is_empty())
    }
}

/// Execution spec for one stage as written in the build definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Ports to expose, as `<port>/<tcp|udp>`.
    pub ports: Vec<String>,
    pub privileged: bool,
    /// Working directory override. Relative paths resolve under the sources.
    pub workdir: Option<String>,
}

impl ContainerConfig {
    /// Environment in `KEY=value` form.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}
