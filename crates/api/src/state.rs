use std::sync::Arc;

use crate::config::ServerConfig;
use crate::lifecycle::LifecycleOrchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Generate / kill / list lifecycle over the process registry.
    pub orchestrator: Arc<LifecycleOrchestrator>,
}
