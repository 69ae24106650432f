//! Gemini provider implementation
//!
//! Talks to the Generative Language REST API. Streaming answers use the
//! `streamGenerateContent` endpoint with `alt=sse`; the thinking phase uses a
//! one-shot `generateContent` call constrained by a response schema.

use std::sync::{Arc, Mutex};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatSession, FragmentStream, InferenceClient, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: ContentRole,
    parts: Vec<Part>,
}

impl Content {
    fn text(role: ContentRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

/// `systemInstruction` content carries no role.
#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Extract the fragment text carried by one SSE line, if any.
fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    let response: GenerateContentResponse = serde_json::from_str(payload).ok()?;
    let text = response.text();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn start_session(
        &self,
        model: &str,
        system_instruction: Option<&str>,
    ) -> Result<Box<dyn ChatSession>, ProviderError> {
        Ok(Box::new(GeminiSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            system_instruction: system_instruction.map(str::to_string),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system_instruction: &str,
        schema: Value,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let request = GenerateContentRequest {
            contents: vec![Content::text(ContentRole::User, prompt)],
            system_instruction: Some(SystemInstruction {
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            }),
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema,
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::InvalidResponse(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let completion: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        Ok(completion.text())
    }
}

/// One conversational session. History lives behind a shared handle so the
/// streaming reply can record itself once it has been fully delivered.
pub struct GeminiSession {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    history: Arc<Mutex<Vec<Content>>>,
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send_streaming(&self, text: &str) -> Result<FragmentStream, ProviderError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );

        let user_content = Content::text(ContentRole::User, text);
        let mut contents = self.history.lock().expect("history lock poisoned").clone();
        contents.push(user_content.clone());

        let request = GenerateContentRequest {
            contents,
            system_instruction: self.system_instruction.as_ref().map(|s| SystemInstruction {
                parts: vec![Part { text: s.clone() }],
            }),
            generation_config: None,
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let history = Arc::clone(&self.history);
        let stream = try_stream! {
            let mut body = response.bytes_stream();
            // Raw byte buffer: a chunk boundary may split a UTF-8 sequence,
            // so lines are only decoded once a full one is available.
            let mut buf: Vec<u8> = Vec::new();
            let mut full_reply = String::new();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| ProviderError::StreamFailed(e.to_string()))?;
                buf.extend_from_slice(&chunk);

                while let Some(newline) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=newline).collect();
                    let line = std::str::from_utf8(&line[..line.len() - 1])
                        .map_err(|e| ProviderError::StreamFailed(e.to_string()))?;

                    if let Some(fragment) = parse_sse_line(line.trim_end_matches('\r')) {
                        full_reply.push_str(&fragment);
                        yield fragment;
                    }
                }
            }

            // Clean end of stream: the exchange becomes part of the session
            // history for subsequent sends.
            let mut history = history.lock().expect("history lock poisoned");
            history.push(user_content);
            history.push(Content::text(ContentRole::Model, full_reply));
        };

        Ok(Box::pin(stream))
    }
}
