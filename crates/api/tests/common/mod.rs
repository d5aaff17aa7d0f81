#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use genserve_api::config::ServerConfig;
use genserve_api::lifecycle::LifecycleOrchestrator;
use genserve_api::router::build_app_router;
use genserve_api::state::AppState;
use genserve_core::error::CoreError;
use genserve_core::generator::CodeGenerator;
use genserve_core::launcher::LaunchConfig;
use genserve_core::types::CommandLine;
use genserve_core::workspace::WorkspaceConfig;

/// Engine output wrapping a minimal server in a fenced block.
pub const FENCED_SERVER: &str = "Here you go:\n```javascript\n\
const express = require('express');\nconst app = express();\n\
const port = 3000;\napp.listen(port);\n```\nDone.";

// ---------------------------------------------------------------------------
// Fake engine
// ---------------------------------------------------------------------------

/// [`CodeGenerator`] returning a canned reply and counting calls.
pub struct FakeGenerator {
    reply: Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            reply: Err(reason.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    fn engine_name(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(CoreError::GenerationFailed)
    }

    async fn is_reachable(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Full router over temp directories, with services run as `sleep`.
///
/// Every service still registered is terminated on drop.
pub struct TestHarness {
    pub app: Router,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub generator: Arc<FakeGenerator>,
    pub workspace_root: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new(generator: FakeGenerator) -> Self {
        Self::with_commands(
            generator,
            CommandLine::new("true", Vec::<String>::new()),
            CommandLine::new("sleep", ["30"]),
        )
    }

    pub fn with_commands(generator: FakeGenerator, install: CommandLine, run: CommandLine) -> Self {
        Self::configured(generator, install, run, |_| {})
    }

    /// Default commands, with `tweak` applied to the config before startup.
    pub fn with_config(generator: FakeGenerator, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        Self::configured(
            generator,
            CommandLine::new("true", Vec::<String>::new()),
            CommandLine::new("sleep", ["30"]),
            tweak,
        )
    }

    fn configured(
        generator: FakeGenerator,
        install: CommandLine,
        run: CommandLine,
        tweak: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = test_config(dir.path(), install, run);
        tweak(&mut config);
        let generator = Arc::new(generator);

        let orchestrator = LifecycleOrchestrator::from_config(&config, generator.clone())
            .expect("open registry");

        let state = AppState {
            config: Arc::new(config.clone()),
            orchestrator: Arc::clone(&orchestrator),
        };

        Self {
            app: build_app_router(state, &config),
            orchestrator,
            generator,
            workspace_root: config.workspace.root,
            _dir: dir,
        }
    }

    /// Number of workspace directories created so far.
    pub fn workspace_count(&self) -> usize {
        std::fs::read_dir(&self.workspace_root)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        for record in self.orchestrator.list() {
            let _ = self.orchestrator.registry().revoke(record.pid, &record.uuid);
        }
    }
}

/// Build a test `ServerConfig` rooted at `root`.
pub fn test_config(root: &Path, install: CommandLine, run: CommandLine) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        engine_url: "http://127.0.0.1:9".to_string(),
        model_name: "fake-model".to_string(),
        max_concurrent: 3,
        storage_root: root.to_path_buf(),
        workspace: WorkspaceConfig {
            root: root.join("workspaces"),
            install,
            install_timeout: Duration::from_secs(10),
        },
        launch: LaunchConfig {
            run,
            base_port: 10001,
            bind_grace: Duration::from_millis(200),
        },
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn generate(app: &Router, description: &str) -> Response<Body> {
    post_json(
        app,
        "/generate-server-files",
        serde_json::json!({ "codeDescription": description }),
    )
    .await
}
