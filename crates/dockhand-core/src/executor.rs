//! Container executor capability.
//!
//! Executors run containers against a Docker host (or anything that behaves
//! like one). The orchestrator only ever talks to this trait.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::job::ContainerConfig;

/// Options for running a new container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference to run.
    pub image: String,
    /// Command to run in the container.
    pub cmd: Vec<String>,
    /// Environment variables, in the form `KEY=value`.
    pub env: Vec<String>,
    /// Anonymous volumes to create in the container.
    pub volumes: Vec<String>,
    /// Containers to link in, in the form `container_name:alias`.
    pub links: Vec<String>,
    /// Containers whose volumes are mounted into this one.
    pub volumes_from: Vec<String>,
    /// Ports to expose, in the form `<port>/<tcp|udp>`.
    pub ports: Vec<String>,
    /// Run with extended privileges.
    pub privileged: bool,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// The image was built locally, so it must not be pulled.
    pub local_image: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Spec carrying the image, command, environment, ports and privilege flag
    /// of a build-definition stage.
    pub fn from_config(config: &ContainerConfig) -> Self {
        Self {
            image: config.image.clone(),
            cmd: config.cmd.clone(),
            env: config.env_pairs(),
            ports: config.ports.clone(),
            privileged: config.privileged,
            ..Default::default()
        }
    }
}

/// Opaque handle to a container started by an [`Executor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Executor-specific identifier (e.g. Docker container ID).
    pub id: String,
    /// Container name, used for links and volumes-from.
    pub name: String,
}

/// Destination for container output.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, chunk: &[u8]) -> Result<()>;
}

/// Trait for container executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Pull the image (unless local), then create and start a container.
    async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle>;

    /// Stream the container's output into the sinks until the stream ends.
    async fn attach(
        &self,
        handle: &ContainerHandle,
        stdout: &dyn OutputSink,
        stderr: &dyn OutputSink,
    ) -> Result<()>;

    /// Block until the container exits and return its exit code.
    async fn wait(&self, handle: &ContainerHandle) -> Result<i64>;

    /// Kill a running container.
    async fn kill(&self, handle: &ContainerHandle) -> Result<()>;

    /// Build an image from a tar build context and return its name.
    async fn build(&self, context: Bytes, output: &dyn OutputSink) -> Result<String>;
}
