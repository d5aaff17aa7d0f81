//! Client for the code-generation engine.
//!
//! [`api::EngineApi`] speaks the engine's HTTP protocol (streamed NDJSON
//! generation, reachability probe). [`generator::EngineGenerator`] adapts it
//! to the [`genserve_core::generator::CodeGenerator`] seam used by the
//! lifecycle.

pub mod api;
pub mod generator;

pub use api::{EngineApi, EngineError};
pub use generator::EngineGenerator;
