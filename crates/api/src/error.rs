use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use genserve_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses of
/// the form `{ "message": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `genserve_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "message": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a core error into an HTTP status, error code, and message.
///
/// Only capacity and lookup failures are returned verbatim. Downstream
/// failures are logged in full and answered with a fixed message.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    let (code, message) = match err {
        CoreError::CapacityExceeded { .. } => {
            return (StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED", err.to_string());
        }
        CoreError::NotFound { .. } => {
            return (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string());
        }
        CoreError::MalformedGenerationOutput(_) => (
            "GENERATION_MALFORMED",
            "The generation engine did not return a usable code block",
        ),
        CoreError::GenerationFailed(_) => ("GENERATION_FAILED", "Code generation failed"),
        CoreError::DependencyInstallFailed { .. } => {
            ("INSTALL_FAILED", "Installing the generated server's dependencies failed")
        }
        CoreError::PortBindConflict { .. } | CoreError::PortsExhausted { .. } => {
            ("PORTS_EXHAUSTED", "No free port is available for the generated server")
        }
        CoreError::SpawnFailed(_) => ("SPAWN_FAILED", "The generated server failed to start"),
        CoreError::SignalDeliveryFailed { .. } => (
            "SIGNAL_FAILED",
            "The server could not be signalled; its record was removed",
        ),
        CoreError::Io(_) | CoreError::Internal(_) => {
            ("INTERNAL_ERROR", "An internal error occurred")
        }
    };

    tracing::error!(error = %err, code, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, code, message.to_string())
}
