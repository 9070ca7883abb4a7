//! Generation capability: turn an assembled prompt into assistant text.
//!
//! [`Generator`] is the seam between the conversation service and an LLM.
//! [`OpenAiGenerator`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Groq, vLLM, Ollama's compatibility API) with bounded
//! retry and a per-call timeout. Exhausted retries surface as
//! [`Error::GenerationUnavailable`].

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;

use docent_core::context::PromptMessage;
use docent_core::{Error, Result};

use crate::config::GenerationConfig;
use crate::retry::{classify_status, AttemptError, RetryPolicy};

const DEFAULT_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, messages: &[PromptMessage]) -> Result<String>;
}

/// A generator that always fails.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _messages: &[PromptMessage]) -> Result<String> {
        Err(Error::GenerationUnavailable(
            "generation provider is disabled".into(),
        ))
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_key,
            model,
            temperature: config.temperature,
            retry: RetryPolicy::new(config.max_retries, config.backoff_base_ms, config.timeout_secs),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        let endpoint = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let (client, endpoint, body, api_key) = (&self.client, &endpoint, &body, &self.api_key);

        self.retry
            .run("generation", Error::GenerationUnavailable, || async move {
                let response = client
                    .post(endpoint)
                    .bearer_auth(api_key)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| AttemptError::Transient(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, text, Error::GenerationUnavailable));
                }
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| AttemptError::Transient(e.to_string()))?;
                parse_completion(&json).map_err(AttemptError::Permanent)
            })
            .await
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            Error::GenerationUnavailable("invalid response: missing choices[0].message.content".into())
        })
}

/// Create the [`Generator`] selected by configuration.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi there" } }]
        });
        assert_eq!(parse_completion(&body).unwrap(), "Hi there");
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_messages_serialize_as_chat_format() {
        use docent_core::context::PromptRole;
        let messages = vec![PromptMessage {
            role: PromptRole::System,
            content: "be brief".into(),
        }];
        assert_eq!(
            serde_json::to_value(&messages).unwrap(),
            json!([{ "role": "system", "content": "be brief" }])
        );
    }

    #[tokio::test]
    async fn test_disabled() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert!(matches!(
            generator.generate(&[]).await,
            Err(Error::GenerationUnavailable(_))
        ));
    }
}
