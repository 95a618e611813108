//! Server configuration.
//!
//! Values arrive already parsed from the binary's flags; nothing here reads
//! the environment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where job records and logs are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    /// Non-durable, logs mirrored to stdout.
    Memory,
    /// SQLite database at the given path.
    Sqlite(PathBuf),
}

impl StoreBackend {
    /// `:memory:` selects the memory store; anything else is a database path.
    pub fn from_location(location: &str) -> Self {
        if location == ":memory:" {
            StoreBackend::Memory
        } else {
            StoreBackend::Sqlite(PathBuf::from(location))
        }
    }
}

/// GitHub application credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Server-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Docker endpoint, e.g. `unix:///var/run/docker.sock` or `tcp://host:2376`.
    pub docker_endpoint: String,
    /// Directory holding `cert.pem`, `key.pem` and `ca.pem` for Docker TLS.
    pub docker_cert_path: Option<PathBuf>,
    pub store: StoreBackend,
    pub github: Option<GitHubCredentials>,
    pub github_api_url: String,
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            docker_endpoint: "unix:///var/run/docker.sock".to_string(),
            docker_cert_path: None,
            store: StoreBackend::Sqlite(PathBuf::from("dockhand.db")),
            github: None,
            github_api_url: "https://api.github.com".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}
