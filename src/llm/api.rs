//! OpenAI-compatible chat completions client.
//!
//! All configured providers (OpenRouter, Gemini, Groq, OpenAI) expose the
//! same protocol; only the base URL, model and credential differ.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};

use super::{ChatClient, ChatMessage};

/// Chat completions client for one provider.
pub struct OpenAiClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

// Manual impl: the credential must never reach logs or test output.
impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Construct a client for `spec`, resolving the credential from its
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Provider`] when the credential env var is
    /// missing or empty, or the HTTP client cannot be built. The caller
    /// sees this synchronously on first use; nothing is retried here.
    pub fn new(spec: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&spec.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Provider(format!(
                    "provider '{}' credential env var is missing or empty: {}",
                    spec.id, spec.api_key_env
                ))
            })?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Provider(format!("cannot build HTTP client: {e}")))?;

        let base = spec.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            url: format!("{base}/chat/completions"),
            model: spec.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                }))
                .collect::<Vec<_>>(),
        });

        debug!(model = self.model.as_str(), "chat completion request");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Llm(format!("request timed out: {e}"))
                } else {
                    AgentError::Llm(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!(
                "API returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("malformed API response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_owned())
            .ok_or_else(|| AgentError::Llm("API response carried no content".to_owned()))
    }
}
