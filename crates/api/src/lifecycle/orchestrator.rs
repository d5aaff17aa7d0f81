//! Central lifecycle orchestrator.
//!
//! Held in [`AppState`](crate::state::AppState) as an
//! `Arc<LifecycleOrchestrator>`.

use std::sync::Arc;
use std::time::Duration;

use genserve_core::error::CoreError;
use genserve_core::extractor;
use genserve_core::generator::{self, CodeGenerator};
use genserve_core::launcher::{self, LaunchedService, Launcher};
use genserve_core::registry::{AdmissionPermit, ProcessRecord, ProcessRegistry, ReconcileReport};
use genserve_core::types::Pid;
use genserve_core::workspace::{Materializer, Workspace};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::ServerConfig;

/// Outcome of a successful generate request.
#[derive(Debug, Clone)]
pub struct GeneratedService {
    pub record: ProcessRecord,
    /// Source as launched, port injected.
    pub code: String,
    pub engine_name: String,
}

/// Orchestrates the generate pipeline and the kill / list operations.
///
/// A generate request:
/// 1. Reserves a capacity slot (fails fast with `CapacityExceeded`).
/// 2. Asks the engine for code and extracts the fenced section.
/// 3. Materializes a workspace and installs dependencies.
/// 4. Launches the service on a free port and registers it.
/// 5. Starts an exit watcher for the registered service.
///
/// Steps 1-3 run on the request future: a dropped or timed-out request
/// releases its slot and stops any running install. Steps 4-5 run on a
/// tracked task detached from the request, so a spawned service is always
/// registered or stopped.
pub struct LifecycleOrchestrator {
    registry: Arc<ProcessRegistry>,
    generator: Arc<dyn CodeGenerator>,
    materializer: Materializer,
    launcher: Launcher,
    pipelines: TaskTracker,
    watchers: CancellationToken,
}

impl LifecycleOrchestrator {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        generator: Arc<dyn CodeGenerator>,
        materializer: Materializer,
        launcher: Launcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            generator,
            materializer,
            launcher,
            pipelines: TaskTracker::new(),
            watchers: CancellationToken::new(),
        })
    }

    /// Open the registry described by `config` and wire up the pipeline.
    pub fn from_config(
        config: &ServerConfig,
        generator: Arc<dyn CodeGenerator>,
    ) -> Result<Arc<Self>, CoreError> {
        let registry = ProcessRegistry::open(config.registry_config())?;
        Ok(Self::new(
            registry,
            generator,
            Materializer::new(config.workspace.clone()),
            Launcher::new(config.launch.clone()),
        ))
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn generator(&self) -> &Arc<dyn CodeGenerator> {
        &self.generator
    }

    /// Reap services left behind by a previous run.
    pub fn reconcile(&self) -> Result<ReconcileReport, CoreError> {
        let report = self.registry.reconcile_on_startup()?;
        tracing::info!(
            markers = report.markers,
            terminated = report.terminated,
            already_gone = report.already_gone,
            failed = report.failed,
            "Startup reconciliation complete",
        );
        Ok(report)
    }

    /// Run the full generate pipeline for `description`.
    ///
    /// Admission happens before anything else, so a rejected request mutates
    /// nothing. The permit is held until registration or any failure.
    pub async fn generate(self: &Arc<Self>, description: String) -> Result<GeneratedService, CoreError> {
        let permit = self.registry.admit()?;

        let prompt = generator::compose_prompt(&description);
        let text = self.generator.generate(&prompt).await?;
        let source = extractor::extract_source(&text)?;
        let workspace = self.materializer.materialize(&source).await?;

        let this = Arc::clone(self);
        let launch = self
            .pipelines
            .spawn(async move { this.launch_and_watch(permit, workspace, source).await });

        launch
            .await
            .map_err(|e| CoreError::Internal(format!("launch task aborted: {e}")))?
    }

    /// Terminate the service matching both `pid` and `uuid`.
    ///
    /// A handle that is not a valid uuid cannot match any record.
    pub fn kill(&self, pid: Pid, uuid: &str) -> Result<ProcessRecord, CoreError> {
        let handle = Uuid::parse_str(uuid).map_err(|_| CoreError::NotFound {
            pid,
            uuid: uuid.to_string(),
        })?;
        self.registry.revoke(pid, &handle)
    }

    pub fn list(&self) -> Vec<ProcessRecord> {
        self.registry.list()
    }

    /// Stop exit watchers and wait up to `grace` for in-flight pipelines.
    ///
    /// Running services are left alone; the next startup reaps them from
    /// their markers.
    pub async fn shutdown(&self, grace: Duration) {
        self.watchers.cancel();
        self.pipelines.close();

        let in_flight = self.pipelines.len();
        if tokio::time::timeout(grace, self.pipelines.wait()).await.is_err() {
            tracing::warn!(in_flight, "Shutdown grace elapsed with generate requests still running");
        }
        tracing::info!(live = self.registry.live_count(), "Lifecycle orchestrator stopped");
    }

    // ---- private helpers ----

    async fn launch_and_watch(
        &self,
        permit: AdmissionPermit,
        workspace: Workspace,
        source: String,
    ) -> Result<GeneratedService, CoreError> {
        let LaunchedService {
            record,
            code,
            child,
            attempts,
        } = self
            .launcher
            .launch(&self.registry, permit, &workspace, &source)
            .await?;

        tracing::info!(
            pid = record.pid,
            uuid = %record.uuid,
            port = record.port,
            directory = %record.directory.display(),
            attempts,
            "Generated server running",
        );

        launcher::watch_exit(
            Arc::clone(&self.registry),
            record.clone(),
            child,
            self.watchers.child_token(),
        );

        Ok(GeneratedService {
            record,
            code,
            engine_name: self.generator.engine_name().to_string(),
        })
    }
}
