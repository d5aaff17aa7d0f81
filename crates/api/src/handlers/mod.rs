//! Request handlers.
//!
//! Handlers validate input, delegate to the
//! [`LifecycleOrchestrator`](crate::lifecycle::LifecycleOrchestrator) and map
//! errors via [`AppError`](crate::error::AppError).

pub mod lifecycle;
