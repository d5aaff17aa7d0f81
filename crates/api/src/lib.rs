//! Orchestrator API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! generate-pipeline orchestrator) so integration tests and the binary
//! entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod router;
pub mod routes;
pub mod state;
