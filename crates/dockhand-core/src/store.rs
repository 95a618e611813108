//! Job store and job logger abstractions.

use async_trait::async_trait;
use std::sync::Arc;

use crate::executor::OutputSink;
use crate::{Job, JobId, Result};

/// Format a step marker line.
pub fn step_marker(name: &str) -> String {
    format!("--- {} ---\n", name)
}

/// Append-only log bound to one job.
///
/// Every `write` appends one chunk; chunks replay in the order written.
#[async_trait]
pub trait JobLogger: OutputSink {
    /// Append a marker for a transition to a new pipeline step.
    async fn write_step(&self, name: &str) -> Result<()> {
        self.write(step_marker(name).as_bytes()).await
    }

    /// All chunks written so far, concatenated in sequence order.
    async fn replay(&self) -> Result<Vec<u8>>;
}

/// Durable storage for job records and their logs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job. A job without an ID is assigned the next global ID and
    /// the next number in its (owner, repo, branch) scope; a job with an ID
    /// overwrites its existing slot.
    async fn save(&self, job: &mut Job) -> Result<()>;

    async fn get_by_id(&self, id: JobId) -> Result<Job>;

    async fn get_by_number(&self, owner: &str, repo: &str, branch: &str, number: u64)
    -> Result<Job>;

    /// Jobs in scope, most recent first.
    async fn list(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<Job>>;

    async fn list_owners(&self) -> Result<Vec<String>>;

    async fn list_repos(&self, owner: &str) -> Result<Vec<String>>;

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>>;

    /// Log handle for a saved job.
    fn logger(&self, job: &Job) -> Result<Arc<dyn JobLogger>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_marker_format() {
        assert_eq!(step_marker("build"), "--- build ---\n");
    }
}
