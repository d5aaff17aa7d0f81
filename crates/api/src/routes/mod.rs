pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the lifecycle route tree (mounted at the root).
///
/// ```text
/// /generate-server-files     generate and launch a server (POST)
/// /kill-server               terminate a server by pid + uuid (POST)
/// /process                   list live servers (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/generate-server-files",
            post(handlers::lifecycle::generate_server_files),
        )
        .route("/kill-server", post(handlers::lifecycle::kill_server))
        .route("/process", get(handlers::lifecycle::list_processes))
}
