use std::path::PathBuf;

use crate::types::Pid;

/// Failure taxonomy of the orchestration engine.
///
/// `PortBindConflict` never leaves the launcher unless the port scan is
/// exhausted, in which case `PortsExhausted` is raised instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed generation output: {0}")]
    MalformedGenerationOutput(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Dependency installation failed in {} (exit {exit_code}): {stderr}", directory.display())]
    DependencyInstallFailed {
        directory: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    #[error("Port {port} is already bound by another process")]
    PortBindConflict { port: u16 },

    #[error("No free port at or above {from}")]
    PortsExhausted { from: u16 },

    #[error("Maximum number of concurrent servers ({ceiling}) reached")]
    CapacityExceeded { ceiling: usize },

    #[error("Process {pid} with uuid {uuid} not found")]
    NotFound { pid: Pid, uuid: String },

    #[error("Failed to signal process {pid}: {reason}")]
    SignalDeliveryFailed { pid: Pid, reason: String },

    #[error("Failed to start service: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
