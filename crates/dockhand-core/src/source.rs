//! Source metadata capability.

use async_trait::async_trait;

use crate::Result;

/// Resolves repository metadata from source control.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Commit SHA currently at the head of `branch`.
    async fn resolve_commit(&self, owner: &str, repo: &str, branch: &str) -> Result<String>;

    /// URL the repository can be cloned from.
    async fn clone_url(&self, owner: &str, repo: &str) -> Result<String>;
}
