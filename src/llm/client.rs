//! # LLM Gateway
//!
//! Talks to OpenAI-compatible `POST {base_url}/chat/completions` endpoints.
//! One request per call: no retries, no streaming.

use super::config::LlmConfig;
use super::prompt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Token budget for the connectivity probe.
const PROBE_MAX_TOKENS: u32 = 5;

/// Token budget for optimization.
const COMPLETION_MAX_TOKENS: u32 = 2000;

/// Longest upstream error body echoed back to the client.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM endpoint returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an empty completion")]
    EmptyResponse,

    #[error("{0}")]
    InvalidInput(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Outcome of a connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Client for OpenAI-compatible `POST {base_url}/chat/completions` endpoints.
///
/// ## Timeouts:
/// - **probe** (`test`): `llm.test_timeout_secs`, short so a dead endpoint
///   doesn't stall the settings page
/// - **completion** (`complete`/`optimize`): `llm.request_timeout_secs`
///
/// A bearer header is only sent when the config carries a key, so local
/// servers (Ollama, LocalAI) work without one. The system prompt is re-read
/// from `llm.prompt_file` on every optimization.
pub struct LlmClient {
    http: Client,
    prompt_file: PathBuf,
    request_timeout: Duration,
    test_timeout: Duration,
}

impl LlmClient {
    pub fn new(prompt_file: PathBuf, request_timeout: Duration, test_timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            prompt_file,
            request_timeout,
            test_timeout,
        }
    }

    /// Check that an endpoint answers a minimal chat completion.
    ///
    /// Failures are reported in the result, never as an error.
    pub async fn test(&self, base_url: &str, api_key: &str, model: &str) -> ProbeResult {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: "Hello",
            }],
            max_tokens: Some(PROBE_MAX_TOKENS),
        };

        match self.send(base_url, api_key, &request, self.test_timeout).await {
            Ok(_) => ProbeResult {
                available: true,
                message: None,
            },
            Err(e) => {
                debug!(base_url, error = %e, "LLM probe failed");
                ProbeResult {
                    available: false,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// One chat completion with the configured system prompt.
    pub async fn complete(&self, config: &LlmConfig, user_prompt: &str) -> Result<String, LlmError> {
        let system_prompt = prompt::load_system_prompt(&self.prompt_file);
        let request = ChatRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: Some(COMPLETION_MAX_TOKENS),
        };

        let start = Instant::now();
        let response = self
            .send(&config.base_url, &config.api_key, &request, self.request_timeout)
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            warn!(config_id = %config.id, "LLM returned empty content");
            return Err(LlmError::EmptyResponse);
        }

        debug!(
            config_id = %config.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.chars().count(),
            "LLM completion finished"
        );
        Ok(content)
    }

    /// Clean up transcribed text.
    pub async fn optimize(&self, config: &LlmConfig, text: &str) -> Result<String, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidInput("Text to optimize is empty".to_string()));
        }
        self.complete(config, &prompt::optimization_request(text)).await
    }

    async fn send(
        &self,
        base_url: &str,
        api_key: &str,
        request: &ChatRequest<'_>,
        timeout: Duration,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

        let mut builder = self.http.post(&url).json(request).timeout(timeout);
        if !api_key.is_empty() {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                message: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }

        response.json::<ChatResponse>().await.map_err(map_transport_error)
    }
}

fn map_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Request(err.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
