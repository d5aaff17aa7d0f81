//! REST client for the generation engine's HTTP endpoints.
//!
//! Wraps `POST /api/generate` (streamed newline-delimited JSON) and the
//! root-path reachability probe using [`reqwest`].

use genserve_core::error::CoreError;
use genserve_core::extractor::StreamAccumulator;
use serde::Serialize;

/// Text the engine answers with on `GET /`.
pub const PROBE_BANNER: &str = "Ollama is running";

/// HTTP client for a single engine instance.
#[derive(Debug, Clone)]
pub struct EngineApi {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

/// Request body of `POST /api/generate`.
#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    model: &'a str,
}

/// Errors from the engine REST layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The HTTP request itself failed (network, DNS, connection reset).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Engine API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The stream was readable but its content was not usable.
    #[error("Engine protocol error: {0}")]
    Protocol(String),
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        CoreError::GenerationFailed(err.to_string())
    }
}

impl EngineApi {
    /// Create a client for the engine at `base_url`, e.g. `http://host:11434`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one generation and return the concatenated fragment text.
    ///
    /// The body is consumed chunk by chunk as it streams in; a fragment with
    /// an `error` field aborts the read.
    pub async fn generate(&self, prompt: &str) -> Result<String, EngineError> {
        let mut response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&GenerateBody {
                prompt,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let mut acc = StreamAccumulator::new();
        while let Some(chunk) = response.chunk().await? {
            acc.push_chunk(&chunk).map_err(protocol)?;
        }

        if acc.skipped() > 0 {
            tracing::warn!(skipped = acc.skipped(), "Engine stream contained unparsable lines");
        }
        if !acc.is_done() {
            tracing::debug!("Engine stream closed without a done fragment");
        }

        let text = acc.finish().map_err(protocol)?;
        tracing::debug!(model = %self.model, chars = text.len(), "Generation complete");
        Ok(text)
    }

    /// Whether the engine answers its root path with the expected banner.
    pub async fn probe(&self) -> Result<bool, EngineError> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        Ok(response.text().await?.contains(PROBE_BANNER))
    }
}

/// Errors from the accumulator are engine-reported failures.
fn protocol(err: CoreError) -> EngineError {
    match err {
        CoreError::GenerationFailed(msg) => EngineError::Protocol(msg),
        other => EngineError::Protocol(other.to_string()),
    }
}
