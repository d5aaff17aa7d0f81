//! Handlers for generated-server lifecycle endpoints.

use axum::extract::State;
use axum::Json;
use genserve_core::registry::ProcessRecord;
use genserve_core::types::Pid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Body of `POST /generate-server-files`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(rename = "codeDescription")]
    pub code_description: String,
}

/// Success envelope of `POST /generate-server-files`.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub message: String,
    pub pid: Pid,
    pub uuid: Uuid,
    pub engine_name: String,
    pub port: u16,
    pub code: String,
    pub directory: String,
}

/// Body of `POST /kill-server`.
///
/// `uuid` stays a string so a malformed handle is a 404 rather than a
/// deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct KillRequest {
    pub pid: Pid,
    pub uuid: String,
}

/// One entry of `GET /process`.
#[derive(Debug, Serialize)]
pub struct ProcessEntry {
    pub pid: Pid,
    pub uuid: Uuid,
    pub port: u16,
}

impl From<ProcessRecord> for ProcessEntry {
    fn from(record: ProcessRecord) -> Self {
        Self {
            pid: record.pid,
            uuid: record.uuid,
            port: record.port,
        }
    }
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// POST /generate-server-files
///
/// Generate, install and launch a server for the description. Returns 429
/// when the concurrency ceiling is reached.
pub async fn generate_server_files(
    State(state): State<AppState>,
    Json(input): Json<GenerateRequest>,
) -> AppResult<Json<GenerateResponse>> {
    if input.code_description.trim().is_empty() {
        return Err(AppError::BadRequest("codeDescription must not be empty".into()));
    }

    let generated = state.orchestrator.generate(input.code_description).await?;
    let record = generated.record;

    Ok(Json(GenerateResponse {
        message: format!("Server generated and running on port {}", record.port),
        pid: record.pid,
        uuid: record.uuid,
        engine_name: generated.engine_name,
        port: record.port,
        code: generated.code,
        directory: record.directory.display().to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Kill
// ---------------------------------------------------------------------------

/// POST /kill-server
///
/// Terminate the server matching both `pid` and `uuid`. Only the matched
/// record is removed.
pub async fn kill_server(
    State(state): State<AppState>,
    Json(input): Json<KillRequest>,
) -> AppResult<String> {
    let record = state.orchestrator.kill(input.pid, &input.uuid)?;
    Ok(format!(
        "Server with PID {} on port {} killed",
        record.pid, record.port
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /process
///
/// Live servers ordered by port.
pub async fn list_processes(State(state): State<AppState>) -> Json<Vec<ProcessEntry>> {
    Json(
        state
            .orchestrator
            .list()
            .into_iter()
            .map(ProcessEntry::from)
            .collect(),
    )
}
