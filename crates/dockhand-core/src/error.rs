//! Error types for dockhand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The build definition is missing required fields or is malformed.
    #[error("config error: {0}")]
    Config(String),

    /// A stage container ran but exited unsuccessfully.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The container runtime or source metadata provider could not be reached
    /// or rejected the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Persistent storage failed to read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// A required read from storage found nothing.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
