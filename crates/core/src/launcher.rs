//! Launching generated services on a free port.
//!
//! [`Launcher::launch`] drives an explicit state machine:
//!
//! ```text
//! ChoosingPort ──► Spawning ──► Bound ──► registered
//!      ▲              │
//!      └── Conflict ◄─┘  (service reported address-in-use)
//!                     └──► error (any other early exit)
//! ```
//!
//! The ledger decides which port to try; the spawned process itself is the
//! secondary signal. A child that exits inside the bind grace window with an
//! address-in-use message in its log is a conflict: its lease is released
//! and the next port is tried.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::ports::DEFAULT_BASE_PORT;
use crate::registry::{AdmissionPermit, PortLease, ProcessRecord, ProcessRegistry};
use crate::signal;
use crate::types::CommandLine;
use crate::workspace::{self, Workspace, SERVER_FILE_NAME};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How long a fresh service must stay alive to count as bound.
pub const DEFAULT_BIND_GRACE: Duration = Duration::from_millis(1500);

/// Log fragments that identify a bind conflict, matched case-insensitively.
const ADDRESS_IN_USE_MARKERS: [&str; 2] = ["eaddrinuse", "address already in use"];

/// Log bytes included in a startup failure message.
const MAX_LOG_TAIL: usize = 2048;

/// A literal port declaration such as `const port = 3000;`.
static PORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:const|let|var)\s+(?:port|PORT)\s*=\s*)\d+").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Command that starts the service inside its workspace.
    pub run: CommandLine,
    /// First port tried by the allocator.
    pub base_port: u16,
    pub bind_grace: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            run: CommandLine::new("node", [SERVER_FILE_NAME]),
            base_port: DEFAULT_BASE_PORT,
            bind_grace: DEFAULT_BIND_GRACE,
        }
    }
}

/// A registered, running service.
#[derive(Debug)]
pub struct LaunchedService {
    pub record: ProcessRecord,
    /// Source as written to disk, with the chosen port injected.
    pub code: String,
    /// Handle for the exit watcher. Dropping it does not kill the service.
    pub child: Child,
    /// Spawn attempts made, conflicts included.
    pub attempts: u32,
}

#[derive(Debug)]
enum LaunchState {
    ChoosingPort { from: u16 },
    Spawning { lease: PortLease },
    Conflict { port: u16 },
    Bound { lease: PortLease, child: Child, code: String },
}

#[derive(Debug)]
enum BindOutcome {
    Alive(Child),
    AddressInUse,
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Launcher {
    config: LaunchConfig,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Spawn `source` from `workspace` and register it.
    ///
    /// Consumes the admission permit: on success it becomes the record, on
    /// any failure it is released together with the current port lease.
    pub async fn launch(
        &self,
        registry: &Arc<ProcessRegistry>,
        permit: AdmissionPermit,
        workspace: &Workspace,
        source: &str,
    ) -> Result<LaunchedService, CoreError> {
        let mut state = LaunchState::ChoosingPort {
            from: self.config.base_port,
        };
        let mut attempts = 0u32;

        loop {
            state = match state {
                LaunchState::ChoosingPort { from } => LaunchState::Spawning {
                    lease: registry.lease_port(from)?,
                },

                LaunchState::Spawning { lease } => {
                    attempts += 1;
                    let port = lease.port();
                    let code = inject_port(source, port);
                    workspace.write_source(&code).await?;

                    tracing::debug!(port, attempt = attempts, "Spawning service");
                    let child = self.spawn(workspace, port)?;

                    match self.await_bind(child, workspace.path(), port).await? {
                        BindOutcome::Alive(child) => LaunchState::Bound { lease, child, code },
                        BindOutcome::AddressInUse => {
                            drop(lease);
                            LaunchState::Conflict { port }
                        }
                    }
                }

                LaunchState::Conflict { port } => {
                    tracing::warn!(
                        port,
                        attempt = attempts,
                        "Port already bound outside the orchestrator, trying the next one",
                    );
                    let from = port
                        .checked_add(1)
                        .ok_or(CoreError::PortsExhausted { from: port })?;
                    LaunchState::ChoosingPort { from }
                }

                LaunchState::Bound {
                    lease,
                    mut child,
                    code,
                } => {
                    let Some(pid) = child.id() else {
                        return Err(CoreError::SpawnFailed(
                            "service exited before it could be registered".into(),
                        ));
                    };

                    return match registry.register(permit, lease, pid, workspace.path().to_path_buf()) {
                        Ok(record) => Ok(LaunchedService {
                            record,
                            code,
                            child,
                            attempts,
                        }),
                        Err(e) => {
                            tracing::error!(pid, error = %e, "Registration failed, stopping service");
                            stop_group(&mut child);
                            let _ = child.wait().await;
                            Err(e)
                        }
                    };
                }
            };
        }
    }

    /// Start the run command in its own process group with `PORT` set and
    /// output going to the workspace log.
    fn spawn(&self, workspace: &Workspace, port: u16) -> Result<Child, CoreError> {
        let log = std::fs::File::create(workspace.log_path())?;
        let log_err = log.try_clone()?;

        let mut cmd = self.config.run.to_command();
        cmd.current_dir(workspace.path())
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| {
            CoreError::SpawnFailed(format!("Failed to run `{}`: {e}", self.config.run))
        })
    }

    /// Wait out the bind grace window.
    async fn await_bind(
        &self,
        mut child: Child,
        dir: &Path,
        port: u16,
    ) -> Result<BindOutcome, CoreError> {
        let waited = tokio::time::timeout(self.config.bind_grace, child.wait()).await;

        let status = match waited {
            Err(_) => return Ok(BindOutcome::Alive(child)),
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stop_group(&mut child);
                return Err(CoreError::Io(e));
            }
        };

        let log = tokio::fs::read_to_string(dir.join(workspace::SERVICE_LOG_NAME))
            .await
            .unwrap_or_default();

        if is_address_in_use(&log) {
            return Ok(BindOutcome::AddressInUse);
        }

        tracing::error!(port, %status, "Service exited during startup");
        Err(CoreError::SpawnFailed(format!(
            "service exited during startup ({status}): {}",
            workspace::tail(&log, MAX_LOG_TAIL)
        )))
    }
}

// ---------------------------------------------------------------------------
// Exit watching
// ---------------------------------------------------------------------------

/// Remove the record once the service exits on its own.
///
/// Cancelling `cancel` stops watching without touching the service, which
/// keeps running and is reaped from its marker on the next startup.
pub fn watch_exit(
    registry: Arc<ProcessRegistry>,
    record: ProcessRecord,
    mut child: Child,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(pid = record.pid, "Exit watcher stopped");
            }
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::info!(pid = record.pid, %status, "Service exited"),
                    Err(e) => tracing::warn!(pid = record.pid, error = %e, "Lost track of service"),
                }
                if registry.forget(record.pid, &record.uuid).is_some() {
                    tracing::info!(
                        pid = record.pid,
                        uuid = %record.uuid,
                        port = record.port,
                        "Removed record of exited service",
                    );
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replace the first literal port declaration in `source` with `port`.
///
/// Sources reading `process.env.PORT` need no rewrite; they get the port
/// from the environment.
pub fn inject_port(source: &str, port: u16) -> String {
    PORT_DECL_RE
        .replace(source, |caps: &regex::Captures<'_>| format!("{}{port}", &caps[1]))
        .into_owned()
}

/// Terminate the service's whole process group, not just the direct child.
fn stop_group(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = signal::terminate(pid) {
        tracing::warn!(pid, error = %e, "Failed to signal service group, killing child only");
        let _ = child.start_kill();
    }
}

fn is_address_in_use(log: &str) -> bool {
    let log = log.to_ascii_lowercase();
    ADDRESS_IN_USE_MARKERS.iter().any(|m| log.contains(m))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::workspace::{Materializer, WorkspaceConfig};

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<ProcessRegistry>,
        workspace: Workspace,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProcessRegistry::open(RegistryConfig::new(dir.path(), 3)).unwrap();
        let materializer = Materializer::new(WorkspaceConfig {
            root: dir.path().join("workspaces"),
            install: CommandLine::new("true", Vec::<String>::new()),
            install_timeout: Duration::from_secs(5),
        });
        let workspace = materializer
            .materialize("const port = 3000;\napp.listen(port);")
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            registry,
            workspace,
        }
    }

    fn launcher(script: &str, base_port: u16) -> Launcher {
        Launcher::new(LaunchConfig {
            run: CommandLine::new("sh", ["-c", script]),
            base_port,
            bind_grace: Duration::from_millis(300),
        })
    }

    #[test]
    fn inject_port_rewrites_first_declaration() {
        let src = "const port = 3000;\nconst other = 1;\nlet PORT = 8080;";
        assert_eq!(
            inject_port(src, 10001),
            "const port = 10001;\nconst other = 1;\nlet PORT = 8080;"
        );
    }

    #[test]
    fn inject_port_leaves_env_based_sources_alone() {
        let src = "const port = process.env.PORT || 3000;";
        assert_eq!(inject_port(src, 10001), src);
    }

    #[test]
    fn address_in_use_detection() {
        assert!(is_address_in_use("Error: listen EADDRINUSE: address already in use :::10001"));
        assert!(is_address_in_use("OSError: [Errno 98] Address already in use"));
        assert!(!is_address_in_use("SyntaxError: Unexpected token"));
    }

    #[tokio::test]
    async fn surviving_service_is_registered_on_base_port() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();

        let mut launched = launcher("echo \"$PORT\" > port.txt; exec sleep 30", 21001)
            .launch(&f.registry, permit, &f.workspace, "const port = 3000;")
            .await
            .unwrap();

        assert_eq!(launched.record.port, 21001);
        assert_eq!(launched.attempts, 1);
        assert_eq!(launched.code, "const port = 21001;");
        assert_eq!(
            std::fs::read_to_string(f.workspace.source_path()).unwrap(),
            "const port = 21001;"
        );
        assert_eq!(
            std::fs::read_to_string(f.workspace.path().join("port.txt"))
                .unwrap()
                .trim(),
            "21001"
        );
        assert_eq!(f.registry.list(), vec![launched.record.clone()]);
        assert_eq!(f.registry.reserved_count(), 0);

        f.registry
            .revoke(launched.record.pid, &launched.record.uuid)
            .unwrap();
        launched.child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_retries_on_next_port() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();
        let script = "if [ \"$PORT\" = \"22001\" ]; then \
                      echo 'Error: listen EADDRINUSE: address already in use :::22001' >&2; \
                      exit 1; fi; exec sleep 30";

        let mut launched = launcher(script, 22001)
            .launch(&f.registry, permit, &f.workspace, "const port = 3000;")
            .await
            .unwrap();

        assert_eq!(launched.record.port, 22002);
        assert_eq!(launched.attempts, 2);
        assert_eq!(f.registry.leased_ports(), vec![22002]);

        f.registry
            .revoke(launched.record.pid, &launched.record.uuid)
            .unwrap();
        launched.child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn ports_in_ledger_are_skipped_before_spawning() {
        let f = fixture().await;
        let held = f.registry.lease_port(23001).unwrap();
        let permit = f.registry.admit().unwrap();

        let mut launched = launcher("exec sleep 30", 23001)
            .launch(&f.registry, permit, &f.workspace, "x()")
            .await
            .unwrap();

        assert_eq!(launched.record.port, 23002);
        assert_eq!(launched.attempts, 1);

        drop(held);
        f.registry
            .revoke(launched.record.pid, &launched.record.uuid)
            .unwrap();
        launched.child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn early_exit_fails_and_releases_everything() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();

        let err = launcher("echo 'SyntaxError: boom' >&2; exit 2", 24001)
            .launch(&f.registry, permit, &f.workspace, "x()")
            .await
            .unwrap_err();

        assert_matches!(err, CoreError::SpawnFailed(msg) if msg.contains("boom"));
        assert!(f.registry.leased_ports().is_empty());
        assert_eq!(f.registry.reserved_count(), 0);
        assert!(f.registry.list().is_empty());
        assert!(f.registry.markers().scan().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_run_program_is_a_spawn_failure() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();
        let launcher = Launcher::new(LaunchConfig {
            run: CommandLine::new("definitely-not-a-runtime", Vec::<String>::new()),
            base_port: 25001,
            bind_grace: Duration::from_millis(100),
        });

        assert_matches!(
            launcher.launch(&f.registry, permit, &f.workspace, "x()").await,
            Err(CoreError::SpawnFailed(_))
        );
        assert!(f.registry.leased_ports().is_empty());
        assert_eq!(f.registry.reserved_count(), 0);
    }

    /// Running, and not a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let state = stat.rsplit_once(')')?.1.trim_start().chars().next()?;
                Some(state != 'Z' && state != 'X')
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_registration_stops_the_whole_service_group() {
        let f = fixture().await;
        std::fs::remove_dir_all(f.registry.markers().dir()).unwrap();
        let permit = f.registry.admit().unwrap();

        let err = launcher("sleep 30 & echo $! > helper.pid; exec sleep 30", 28001)
            .launch(&f.registry, permit, &f.workspace, "x()")
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Io(_));

        let helper: u32 = std::fs::read_to_string(f.workspace.path().join("helper.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while is_running(helper) {
            assert!(std::time::Instant::now() < deadline, "helper process survived");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(f.registry.leased_ports().is_empty());
        assert_eq!(f.registry.reserved_count(), 0);
        assert!(f.registry.list().is_empty());
    }

    #[tokio::test]
    async fn watcher_forgets_service_that_exits_on_its_own() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();

        let launched = launcher("exec sleep 1", 26001)
            .launch(&f.registry, permit, &f.workspace, "x()")
            .await
            .unwrap();
        assert_eq!(f.registry.live_count(), 1);

        let handle = watch_exit(
            Arc::clone(&f.registry),
            launched.record.clone(),
            launched.child,
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("watcher finishes")
            .unwrap();

        assert_eq!(f.registry.live_count(), 0);
        assert!(f.registry.leased_ports().is_empty());
        assert!(f.registry.markers().scan().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_watcher_leaves_service_running() {
        let f = fixture().await;
        let permit = f.registry.admit().unwrap();

        let launched = launcher("exec sleep 30", 27001)
            .launch(&f.registry, permit, &f.workspace, "x()")
            .await
            .unwrap();
        let record = launched.record.clone();

        let cancel = CancellationToken::new();
        let handle = watch_exit(Arc::clone(&f.registry), record.clone(), launched.child, cancel.clone());
        cancel.cancel();
        handle.await.unwrap();

        assert!(crate::signal::is_alive(record.pid));
        assert_eq!(f.registry.live_count(), 1);

        f.registry.revoke(record.pid, &record.uuid).unwrap();
    }
}
