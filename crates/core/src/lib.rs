//! Orchestration engine for generated network services.
//!
//! Turns engine output into program source, materializes it into an
//! isolated workspace, launches it on a free port and keeps the authoritative
//! record of what is running. Nothing here knows about HTTP; the API crate
//! composes these pieces into the generate / kill / list lifecycle.

pub mod error;
pub mod extractor;
pub mod generator;
pub mod launcher;
pub mod manifest;
pub mod markers;
pub mod ports;
pub mod registry;
pub mod signal;
pub mod types;
pub mod workspace;
