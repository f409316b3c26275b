//! Chat model abstraction and the OpenAI-compatible HTTP client.
//!
//! Both supported providers speak the OpenAI chat-completions protocol;
//! they differ only in base URL and credential:
//!
//! | Provider | Base URL | Credential |
//! |----------|----------|------------|
//! | `openai` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |
//! | `groq` | `https://api.groq.com/openai/v1` | `GROQ_API_KEY` |

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmSettings;
use crate::error::{PortalError, Result};
use crate::models::ChatMessage;

/// A language model that turns a list of messages into a reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Sends `messages` and returns the assistant reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Supported chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Groq,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Provider> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "groq" => Some(Provider::Groq),
            _ => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
        }
    }
}

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAICompatibleChat {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAICompatibleChat {
    pub fn new(provider: Provider, settings: &LlmSettings, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            provider,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key: api_key.into(),
            model: settings.model_name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }


    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAICompatibleChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(PortalError::Model(format!(
                "{:?} chat API error {}: {}",
                self.provider, status, body_text
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(model = %self.model, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LlmSettings {
        LlmSettings {
            provider: "groq".to_string(),
            model_name: "llama-3.1-8b-instant".to_string(),
            temperature: 0.0,
            max_tokens: Some(512),
            base_url: None,
            timeout_secs: 30,
        }
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(Provider::parse("OpenAI"), Some(Provider::OpenAI));
        assert_eq!(Provider::parse("groq"), Some(Provider::Groq));
        assert_eq!(Provider::parse("anthropic"), None);
    }

    #[test]
    fn request_body_includes_max_tokens_when_set() {
        let chat = OpenAICompatibleChat::new(Provider::Groq, &settings(), "key").unwrap();
        let body = chat.request_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(chat.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn completion_response_tolerates_null_content() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
