//! GitHub source provider.

use async_trait::async_trait;
use dockhand_config::GitHubCredentials;
use dockhand_core::source::SourceProvider;
use serde::Deserialize;

const USER_AGENT: &str = "dockhand";

/// Resolves commits and clone URLs through the GitHub REST API.
///
/// Requests are unauthenticated unless application credentials are set, in
/// which case they are sent as basic auth for the higher rate limit.
pub struct GitHubSource {
    client: reqwest::Client,
    api_url: String,
    credentials: Option<GitHubCredentials>,
}

impl GitHubSource {
    pub fn new(api_url: impl Into<String>, credentials: Option<GitHubCredentials>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");

        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.client_id, Some(&creds.client_secret)),
            None => builder,
        }
    }

    /// API path for a repository, each segment percent-encoded.
    fn repo_path(owner: &str, repo: &str) -> String {
        format!(
            "/repos/{}/{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo)
        )
    }

    fn commit_path(owner: &str, repo: &str, reference: &str) -> String {
        format!(
            "{}/commits/{}",
            Self::repo_path(owner, repo),
            urlencoding::encode(reference)
        )
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, GitHubError> {
        let response = self
            .request(path)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))
    }
}

#[async_trait]
impl SourceProvider for GitHubSource {
    async fn resolve_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> dockhand_core::Result<String> {
        let commit: GitHubCommit = self
            .get(&Self::commit_path(owner, repo, branch))
            .await?;
        Ok(commit.sha)
    }

    async fn clone_url(&self, owner: &str, repo: &str) -> dockhand_core::Result<String> {
        let repository: GitHubRepo = self.get(&Self::repo_path(owner, repo)).await?;
        Ok(repository.clone_url)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    clone_url: String,
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for dockhand_core::Error {
    fn from(err: GitHubError) -> Self {
        dockhand_core::Error::Transport(format!("GitHub: {}", err))
    }
}
