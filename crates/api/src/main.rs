use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genserve_api::config::ServerConfig;
use genserve_api::lifecycle::LifecycleOrchestrator;
use genserve_api::router::build_app_router;
use genserve_api::state::AppState;
use genserve_core::generator::CodeGenerator;
use genserve_engine::{EngineApi, EngineGenerator};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "genserve_api=debug,genserve_core=debug,genserve_engine=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        storage_root = %config.storage_root.display(),
        workspace_root = %config.workspace.root.display(),
        max_concurrent = config.max_concurrent,
        "Loaded server configuration",
    );

    // --- Generation engine ---
    let generator = Arc::new(EngineGenerator::new(EngineApi::new(
        config.engine_url.clone(),
        config.model_name.clone(),
    )));
    if generator.is_reachable().await {
        tracing::info!(engine = %config.engine_url, model = %config.model_name, "Generation engine reachable");
    } else {
        tracing::warn!(
            engine = %config.engine_url,
            "Generation engine not reachable; generate requests will fail until it is",
        );
    }

    // --- Lifecycle ---
    let orchestrator = LifecycleOrchestrator::from_config(&config, generator)
        .expect("Failed to open process registry");

    if let Err(e) = orchestrator.reconcile() {
        tracing::error!(error = %e, "Startup reconciliation failed");
    }

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::clone(&orchestrator),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    orchestrator
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
