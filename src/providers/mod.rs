//! Remote inference client abstraction
//!
//! The engine talks to the hosted model through two object-safe traits so the
//! orchestration logic can run against scripted fakes in tests: a client that
//! opens conversational sessions and answers one-shot structured requests, and
//! the session itself, which streams answer fragments in delivery order.

mod gemini;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use thiserror::Error;

pub use gemini::GeminiClient;

/// The three models the playground exposes.
pub const MODEL_OPTIONS: [&str; 3] = ["gemini-2.5-flash", "gemini-2.5-pro", "gemini-flash-latest"];

/// Model used for the thinking request regardless of the panel selection.
pub const THINKING_MODEL: &str = "gemini-2.5-flash";

pub fn default_model() -> &'static str {
    MODEL_OPTIONS[0]
}

pub fn is_known_model(model: &str) -> bool {
    MODEL_OPTIONS.contains(&model)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream failed: {0}")]
    StreamFailed(String),
}

/// A finite, in-order, non-restartable sequence of answer fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A conversational session holding its own history and system instruction.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send one user message and stream the reply incrementally.
    async fn send_streaming(&self, text: &str) -> Result<FragmentStream, ProviderError>;
}

/// Capability of the hosted model API consumed by the engine.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Open a conversational session for `model`.
    async fn start_session(
        &self,
        model: &str,
        system_instruction: Option<&str>,
    ) -> Result<Box<dyn ChatSession>, ProviderError>;

    /// One-shot generation constrained to `schema`, returning the raw payload.
    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system_instruction: &str,
        schema: Value,
    ) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_options() {
        assert!(is_known_model(default_model()));
        assert!(is_known_model("gemini-2.5-pro"));
        assert!(!is_known_model("gpt-4o"));
        assert!(is_known_model(THINKING_MODEL));
    }
}
