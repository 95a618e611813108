//! Configuration for dockhand.
//!
//! This crate handles:
//! - Parsing of build definitions (dockhand.kdl)
//! - Server configuration values

pub mod error;
pub mod job;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use job::{CONFIG_FILE, parse_job_config, parse_job_config_bytes};
pub use system::{GitHubCredentials, ServerConfig, StoreBackend};
