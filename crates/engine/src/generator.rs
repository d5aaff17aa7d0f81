use async_trait::async_trait;
use genserve_core::error::CoreError;
use genserve_core::generator::CodeGenerator;

use crate::api::EngineApi;

/// [`CodeGenerator`] backed by a remote engine.
#[derive(Debug, Clone)]
pub struct EngineGenerator {
    api: EngineApi,
}

impl EngineGenerator {
    pub fn new(api: EngineApi) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &EngineApi {
        &self.api
    }
}

#[async_trait]
impl CodeGenerator for EngineGenerator {
    fn engine_name(&self) -> &str {
        self.api.model()
    }

    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        self.api.generate(prompt).await.map_err(|e| {
            tracing::error!(engine = %self.api.base_url(), error = %e, "Generation request failed");
            CoreError::from(e)
        })
    }

    async fn is_reachable(&self) -> bool {
        match self.api.probe().await {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::debug!(engine = %self.api.base_url(), error = %e, "Engine probe failed");
                false
            }
        }
    }
}
