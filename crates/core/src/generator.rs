//! Seam between the lifecycle and the external generation engine.

use async_trait::async_trait;

use crate::error::CoreError;

/// Instructions prepended to every caller description.
pub const PROMPT_PREAMBLE: &str = "Ensure the API is secure, but don't use authentication,\
follows RESTful principles, and includes error handling. Always add a /test endpoint \
that returns a 200 OK response and does not require authentication.";

/// Combine the fixed preamble with the caller's description.
pub fn compose_prompt(description: &str) -> String {
    format!("{PROMPT_PREAMBLE} {}", description.trim())
}

/// A text-completion service that produces program text for a prompt.
///
/// Implementations return the full concatenated text of the engine's
/// answer; isolating the code section is the caller's job.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Name of the model doing the generation, echoed back to callers.
    fn engine_name(&self) -> &str;

    /// Run one generation and return the engine's complete text.
    async fn generate(&self, prompt: &str) -> Result<String, CoreError>;

    /// Whether the engine currently answers at all.
    async fn is_reachable(&self) -> bool;
}
