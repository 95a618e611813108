//! Application state.

use dockhand_config::{ServerConfig, StoreBackend};
use dockhand_core::executor::Executor;
use dockhand_core::store::JobStore;
use dockhand_db::{MemoryJobStore, SqliteJobStore};
use dockhand_executor::DockerExecutor;
use dockhand_scheduler::JobDispatcher;
use std::sync::Arc;
use tracing::info;

use crate::services::GitHubSource;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: JobDispatcher,
}

impl AppState {
    pub fn new(dispatcher: JobDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Connect every collaborator named by the server configuration.
    pub async fn from_config(config: &ServerConfig) -> dockhand_core::Result<Self> {
        let executor = DockerExecutor::connect(
            &config.docker_endpoint,
            config.docker_cert_path.as_deref(),
        )?;
        info!(
            executor = executor.name(),
            endpoint = %config.docker_endpoint,
            "Connected container executor"
        );

        let store: Arc<dyn JobStore> = match &config.store {
            StoreBackend::Memory => {
                info!("Using in-memory job store");
                Arc::new(MemoryJobStore::new())
            }
            StoreBackend::Sqlite(path) => {
                info!(path = %path.display(), "Opening job store");
                Arc::new(SqliteJobStore::open(path).await?)
            }
        };

        let source = GitHubSource::new(config.github_api_url.clone(), config.github.clone());

        Ok(Self::new(JobDispatcher::new(
            Arc::new(executor),
            store,
            Arc::new(source),
        )))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.dispatcher.store()
    }
}
