//! Job orchestration for dockhand.
//!
//! Runs each build request through the fetch, configure, services, build and
//! release pipeline, one tokio task per job.

pub mod dispatcher;
pub mod orchestrator;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dispatcher::{JobDispatcher, JobTrigger};
pub use orchestrator::{ARTIFACTS_DIR, BUILD_DIR, GIT_IMAGE, JobRequest, Stage};
