//! Core domain types and traits for dockhand.
//!
//! This crate contains:
//! - Job records and their storage locators
//! - Build-definition types (job and container configuration)
//! - The container executor and source metadata capability traits
//! - The job store and job logger abstractions

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod source;
pub mod store;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{ContainerConfig, Job, JobConfig, JobLocator};
