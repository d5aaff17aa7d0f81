use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the generation engine answers its probe.
    pub engine_reachable: bool,
    /// Registered services.
    pub live_processes: usize,
    /// Admission ceiling.
    pub capacity: usize,
}

/// GET /health -- returns service and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_reachable = state.orchestrator.generator().is_reachable().await;
    let registry = state.orchestrator.registry();

    let status = if engine_reachable { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        engine_reachable,
        live_processes: registry.live_count(),
        capacity: state.config.max_concurrent,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
