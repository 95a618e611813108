//! Container executor backends for dockhand.
//!
//! Provides the Docker executor used to run every pipeline stage.

pub mod docker;

pub use docker::{DockerExecutor, Endpoint};
pub use dockhand_core::executor::{ContainerHandle, ContainerSpec, Executor, OutputSink};
