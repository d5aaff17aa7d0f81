use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use genserve_core::launcher::LaunchConfig;
use genserve_core::registry::{RegistryConfig, DEFAULT_MAX_CONCURRENT};
use genserve_core::types::CommandLine;
use genserve_core::workspace::WorkspaceConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5656`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `600`, generation is slow).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight generate requests (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Generation engine base URL.
    pub engine_url: String,
    /// Model passed to the engine and echoed back as `engine_name`.
    pub model_name: String,
    /// Admission ceiling for concurrently running services.
    pub max_concurrent: usize,
    /// Root of the orchestrator's own durable state (markers).
    pub storage_root: PathBuf,
    pub workspace: WorkspaceConfig,
    pub launch: LaunchConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `HOST`                   | `0.0.0.0`                 |
    /// | `SERVER_PORT`            | `5656`                    |
    /// | `CORS_ORIGINS`           | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`   | `600`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `10`                      |
    /// | `ENGINE_URL`             | `http://localhost:11434`  |
    /// | `MODEL_NAME`             | `Qwen2.5-Coder:1.5B`      |
    /// | `MAX_CONCURRENT_SERVERS` | `3`                       |
    /// | `BASE_PORT`              | `10001`                   |
    /// | `STORAGE_ROOT`           | current directory         |
    /// | `WORKSPACE_ROOT`         | OS temp directory         |
    /// | `INSTALL_COMMAND`        | `npm install`             |
    /// | `INSTALL_TIMEOUT_SECS`   | `300`                     |
    /// | `RUN_COMMAND`            | `node server.js`          |
    /// | `BIND_GRACE_MS`          | `1500`                    |
    ///
    /// `PORT` is left to the generated services, which read it as their
    /// listen port.
    ///
    /// Panics on unparsable values; misconfiguration should fail at startup.
    pub fn from_env() -> Self {
        let workspace_defaults = WorkspaceConfig::default();
        let launch_defaults = LaunchConfig::default();

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let storage_root = std::env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::current_dir().expect("current directory must be accessible")
            });

        let workspace = WorkspaceConfig {
            root: std::env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(workspace_defaults.root),
            install: command_env("INSTALL_COMMAND").unwrap_or(workspace_defaults.install),
            install_timeout: Duration::from_secs(parse_env(
                "INSTALL_TIMEOUT_SECS",
                workspace_defaults.install_timeout.as_secs(),
            )),
        };

        let launch = LaunchConfig {
            run: command_env("RUN_COMMAND").unwrap_or(launch_defaults.run),
            base_port: parse_env("BASE_PORT", launch_defaults.base_port),
            bind_grace: Duration::from_millis(parse_env(
                "BIND_GRACE_MS",
                u64::try_from(launch_defaults.bind_grace.as_millis()).unwrap_or(1500),
            )),
        };

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("SERVER_PORT", 5656),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 600),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 10),
            engine_url: env_or("ENGINE_URL", "http://localhost:11434"),
            model_name: env_or("MODEL_NAME", "Qwen2.5-Coder:1.5B"),
            max_concurrent: parse_env("MAX_CONCURRENT_SERVERS", DEFAULT_MAX_CONCURRENT),
            storage_root,
            workspace,
            launch,
        }
    }

    /// Registry parameters: markers under `<storage_root>/processes`.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(&self.storage_root, self.max_concurrent)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn command_env(key: &str) -> Option<CommandLine> {
    let raw = std::env::var(key).ok()?;
    Some(CommandLine::parse(&raw).unwrap_or_else(|| panic!("{key} must not be empty")))
}
