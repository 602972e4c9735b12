//! Anthropic Messages API language model.
//!
//! This module is only available when the `anthropic` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::synthesis::LanguageModel;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// The default model for answer synthesis.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

const DEFAULT_MAX_TOKENS: u32 = 2048;

/// A [`LanguageModel`] backed by the Anthropic Messages API.
///
/// Sampling temperature defaults to 0 so answers stay close to the
/// retrieved context. The API key is passed in by the caller.
pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicModel {
    /// Create a client for [`DEFAULT_MODEL`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("Anthropic API key must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn failure(&self, message: String, transient: bool) -> RagError {
        RagError::SynthesisError { model: self.model.clone(), message, transient }
    }
}

/// Whether an HTTP status is worth retrying. 529 is Anthropic's "overloaded".
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 529) || (500..600).contains(&status)
}

/// Concatenate the text blocks of a Messages API response.
fn response_text(body: &Value) -> Option<String> {
    let blocks = body["content"].as_array()?;
    let text: String = blocks
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();
    Some(text)
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!(model = %self.model, prompt_chars = prompt.len(), "sending completion request");

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "completion request failed");
                self.failure(format!("request failed: {e}"), true)
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(model = %self.model, status, "completion API error");
            let transient = is_transient_status(status);
            return Err(self.failure(format!("API returned {status}: {detail}"), transient));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.failure(format!("failed to parse response: {e}"), false))?;

        response_text(&body)
            .ok_or_else(|| self.failure("response has no content blocks".into(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(529));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
    }

    #[test]
    fn joins_text_blocks() {
        let body = json!({
            "content": [
                { "type": "text", "text": "Cats " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "nap." }
            ]
        });
        assert_eq!(response_text(&body).as_deref(), Some("Cats nap."));
        assert_eq!(response_text(&json!({ "error": {} })), None);
    }

    #[test]
    fn rejects_empty_key() {
        assert!(matches!(AnthropicModel::new(" "), Err(RagError::ConfigError(_))));
    }
}
