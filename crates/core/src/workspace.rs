//! Per-request workspaces for generated services.
//!
//! [`Materializer::materialize`] turns program source into a ready-to-run
//! directory: a fresh uniquely named folder, the source under
//! [`SERVER_FILE_NAME`], a derived `package.json`, and installed
//! dependencies. A failed install leaves the directory in place so it can be
//! inspected.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::fs;
use uuid::Uuid;

use crate::error::CoreError;
use crate::manifest;
use crate::types::CommandLine;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File the generated source is written to.
pub const SERVER_FILE_NAME: &str = "server.js";

/// Dependency manifest file name.
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Combined stdout/stderr of the running service.
pub const SERVICE_LOG_NAME: &str = "service.log";

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "server-";

/// Default timeout for the dependency installation step.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum number of stderr bytes kept in a [`CoreError::DependencyInstallFailed`].
const MAX_STDERR_TAIL: usize = 4096;

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Directory owned by one generated service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(SERVER_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(SERVICE_LOG_NAME)
    }

    /// Overwrite the service source.
    pub async fn write_source(&self, source: &str) -> Result<(), CoreError> {
        fs::write(self.source_path(), source).await?;
        Ok(())
    }
}

/// Where workspaces live and how their dependencies are installed.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Parent directory of all workspaces.
    pub root: PathBuf,
    /// Installation step run inside each workspace.
    pub install: CommandLine,
    pub install_timeout: Duration,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            install: CommandLine::new("npm", ["install"]),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// Builds dependency-resolved workspaces from program source.
#[derive(Debug, Clone)]
pub struct Materializer {
    config: WorkspaceConfig,
}

impl Materializer {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Create a fresh workspace for `source` and install its dependencies.
    pub async fn materialize(&self, source: &str) -> Result<Workspace, CoreError> {
        let workspace = self.allocate().await?;
        workspace.write_source(source).await?;

        let manifest = manifest::derive_manifest(source, SERVER_FILE_NAME);
        let json = manifest
            .to_json()
            .map_err(|e| CoreError::Internal(format!("Failed to serialize manifest: {e}")))?;
        fs::write(workspace.manifest_path(), json).await?;

        tracing::info!(
            directory = %workspace.path().display(),
            dependencies = manifest.dependencies.len(),
            "Workspace prepared, installing dependencies",
        );

        self.install(&workspace).await?;
        Ok(workspace)
    }

    /// Create a new, uniquely named directory under the workspace root.
    ///
    /// `create_dir` (not `create_dir_all`) on the leaf guarantees the
    /// directory did not exist before this request.
    async fn allocate(&self) -> Result<Workspace, CoreError> {
        fs::create_dir_all(&self.config.root).await?;
        let dir = self
            .config
            .root
            .join(format!("{WORKSPACE_PREFIX}{}", Uuid::new_v4().simple()));
        fs::create_dir(&dir).await?;
        Ok(Workspace { dir })
    }

    /// Run the installation step synchronously inside `workspace`.
    async fn install(&self, workspace: &Workspace) -> Result<(), CoreError> {
        let install = &self.config.install;
        let failed = |exit_code: i32, stderr: String| CoreError::DependencyInstallFailed {
            directory: workspace.path().to_path_buf(),
            exit_code,
            stderr,
        };

        let mut cmd = install.to_command();
        cmd.current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.config.install_timeout, cmd.output()).await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                tracing::info!(
                    directory = %workspace.path().display(),
                    command = %install,
                    "Dependencies installed",
                );
                Ok(())
            }
            Ok(Ok(output)) => {
                let stderr = tail(&String::from_utf8_lossy(&output.stderr), MAX_STDERR_TAIL);
                let exit_code = output.status.code().unwrap_or(-1);
                tracing::error!(
                    directory = %workspace.path().display(),
                    exit_code,
                    stderr = %stderr,
                    "Dependency installation failed",
                );
                Err(failed(exit_code, stderr))
            }
            Ok(Err(e)) => {
                tracing::error!(command = %install, error = %e, "Failed to run installer");
                Err(failed(-1, format!("Failed to run `{install}`: {e}")))
            }
            Err(_) => {
                tracing::error!(
                    directory = %workspace.path().display(),
                    timeout_secs = self.config.install_timeout.as_secs(),
                    "Dependency installation timed out",
                );
                Err(failed(
                    -1,
                    format!(
                        "`{install}` timed out after {}s",
                        self.config.install_timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

/// Last `max` bytes of `text`, cut at a character boundary.
pub(crate) fn tail(text: &str, max: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
