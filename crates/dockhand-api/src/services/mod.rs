//! Integrations with external services.

pub mod github;

pub use github::{GitHubError, GitHubSource};
