//! Generate / kill / list lifecycle.
//!
//! The [`LifecycleOrchestrator`] ties the core pipeline stages (generation,
//! extraction, materialization, launch) to the process registry, providing a
//! single entry point for the HTTP handlers.

pub mod orchestrator;

pub use orchestrator::{GeneratedService, LifecycleOrchestrator};
