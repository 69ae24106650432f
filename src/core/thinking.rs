//! Thinking-step generation
//!
//! One structured-output request produces the ordered list of strategic
//! thinking steps revealed before the final answer. The payload contract is a
//! JSON object with a `thinking` array of 6-10 strings; the count is expected,
//! not enforced. A payload that fails to parse degrades to a one-element
//! fallback list, so the orchestrator always receives a usable list.
//! Transport failures propagate to the turn-level error handler.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::prompts;
use crate::providers::{InferenceClient, ProviderError, THINKING_MODEL};

/// Shown as the single step when the model's payload is unusable.
pub const FALLBACK_STEP: &str = "Failed to generate thinking steps. Retrying...";

#[derive(Debug, Deserialize)]
struct ThinkingPayload {
    #[serde(default)]
    thinking: Vec<String>,
}

pub struct ThinkingStepGenerator {
    client: Arc<dyn InferenceClient>,
}

impl ThinkingStepGenerator {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Ask for the strategic plan behind answering `user_text`.
    pub async fn generate(&self, user_text: &str) -> Result<Vec<String>, ProviderError> {
        let raw = self
            .client
            .generate_structured(
                THINKING_MODEL,
                &prompts::thinking_prompt(user_text),
                prompts::THINKING_SYSTEM_INSTRUCTION,
                prompts::thinking_steps_schema(),
            )
            .await?;

        Ok(parse_steps(&raw))
    }
}

fn parse_steps(raw: &str) -> Vec<String> {
    match serde_json::from_str::<ThinkingPayload>(raw) {
        Ok(payload) if !payload.thinking.is_empty() => payload.thinking,
        _ => vec![FALLBACK_STEP.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::providers::ChatSession;

    struct ScriptedClient {
        payload: Result<String, ()>,
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn start_session(
            &self,
            _model: &str,
            _system_instruction: Option<&str>,
        ) -> Result<Box<dyn ChatSession>, ProviderError> {
            unimplemented!("not used by the generator")
        }

        async fn generate_structured(
            &self,
            _model: &str,
            _prompt: &str,
            _system_instruction: &str,
            _schema: Value,
        ) -> Result<String, ProviderError> {
            self.payload
                .clone()
                .map_err(|_| ProviderError::InvalidResponse("boom".into()))
        }
    }

    #[test]
    fn test_parse_valid_payload() {
        let steps = parse_steps(r#"{"thinking": ["look first", "then decide"]}"#);
        assert_eq!(steps, vec!["look first", "then decide"]);
    }

    #[test]
    fn test_malformed_payload_falls_back_to_single_step() {
        for raw in ["not json at all", "{\"thinking\": \"oops\"}", "[]", ""] {
            let steps = parse_steps(raw);
            assert_eq!(steps.len(), 1, "payload {raw:?} should degrade");
            assert_eq!(steps[0], FALLBACK_STEP);
        }
    }

    #[test]
    fn test_missing_or_empty_field_falls_back() {
        assert_eq!(parse_steps("{}"), vec![FALLBACK_STEP.to_string()]);
        assert_eq!(
            parse_steps(r#"{"thinking": []}"#),
            vec![FALLBACK_STEP.to_string()]
        );
    }

    #[tokio::test]
    async fn test_generate_returns_parsed_steps() {
        let generator = ThinkingStepGenerator::new(Arc::new(ScriptedClient {
            payload: Ok(r#"{"thinking": ["a", "b"]}"#.to_string()),
        }));

        let steps = generator.generate("why?").await.unwrap();
        assert_eq!(steps, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let generator = ThinkingStepGenerator::new(Arc::new(ScriptedClient { payload: Err(()) }));
        assert!(generator.generate("why?").await.is_err());
    }
}
