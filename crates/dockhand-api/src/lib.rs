//! HTTP API server for dockhand.
//!
//! Exposes job creation, job history, and log replay over REST.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
