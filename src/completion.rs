//! Chat-completion service client.
//!
//! Posts an OpenAI-style chat-completion request with the credential in the
//! `Authorization` header. The credential is passed per call; there is no
//! shared key state in the client itself.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ServicesConfig;
use crate::error::CompletionFailure;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a reply from a system instruction and a user message.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        api_key: &str,
    ) -> Result<String, CompletionFailure>;
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpCompletionProvider {
    pub fn new(services: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: services.completion_url.clone(),
            model: services.completion_model.clone(),
            max_tokens: services.max_tokens,
            temperature: services.temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        api_key: &str,
    ) -> Result<String, CompletionFailure> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionFailure(format!("HTTP {}: {}", status, body)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CompletionFailure(format!("invalid response body: {}", e)))?;

        parse_completion_response(&json)
    }
}

/// Extract the first choice's message content; an empty reply is a failure
/// left for the caller's degraded path, not papered over here.
fn parse_completion_response(json: &serde_json::Value) -> Result<String, CompletionFailure> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| CompletionFailure("no message content in response".to_string()))?;

    if content.trim().is_empty() {
        return Err(CompletionFailure("empty message content".to_string()));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "The answer is 42." } }]
        });
        assert_eq!(
            parse_completion_response(&json).unwrap(),
            "The answer is 42."
        );
    }

    #[test]
    fn test_parse_empty_choices_fails() {
        let json = serde_json::json!({ "choices": [] });
        assert!(parse_completion_response(&json).is_err());
    }

    #[test]
    fn test_parse_blank_content_fails() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "   " } }]
        });
        assert!(parse_completion_response(&json).is_err());
    }

    #[test]
    fn test_parse_missing_message_fails() {
        let json = serde_json::json!({ "choices": [{ "text": "legacy shape" }] });
        assert!(parse_completion_response(&json).is_err());
    }
}
