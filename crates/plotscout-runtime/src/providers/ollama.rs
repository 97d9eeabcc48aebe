//! Ollama adapter using the `/api/chat` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::factory::{ProviderFactory, ProviderKind};
use super::http;
use super::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Local Ollama server.
#[derive(Debug)]
pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn from_config(name: &str, config: &JsonValue) -> Self {
        Self::new(
            name,
            config["base_url"]
                .as_str()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/'),
            config["model"].as_str().unwrap_or(DEFAULT_MODEL),
        )
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let model = config.model.as_deref().unwrap_or(&self.model);
        let request = OllamaChatRequest {
            model,
            messages: &messages,
            stream: false,
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens as i64,
            },
        };

        tracing::debug!(
            provider = %self.name,
            model = %model,
            message_count = messages.len(),
            "Sending completion request to Ollama"
        );

        let response = http::client()
            .post(format!("{}/api/chat", self.base_url))
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::send_error(e, config.timeout))?;
        let body: OllamaChatResponse = http::decode(http::check_status(response).await?).await?;

        Ok(CompletionResponse {
            content: http::non_empty(body.message.content)?,
            usage: TokenUsage {
                prompt_tokens: body.prompt_eval_count.unwrap_or(0),
                completion_tokens: body.eval_count.unwrap_or(0),
                ..Default::default()
            },
            model: body.model,
            stop_reason: body.done_reason,
        })
    }

    async fn health_check(&self) -> bool {
        let response = http::client()
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match response {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "Ollama health check failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Builds [`OllamaProvider`]s.
///
/// ```yaml
/// kind: ollama
/// base_url: http://localhost:11434
/// model: llama3.1:8b
/// ```
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(config)?;
        Ok(Arc::new(OllamaProvider::from_config(name, config)))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Local Ollama server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults() {
        let provider = OllamaProvider::from_config("local", &serde_json::json!({}));
        assert_eq!(provider.name(), "local");
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_request_disables_streaming() {
        let messages = vec![ChatMessage::user("hi")];
        let request = OllamaChatRequest {
            model: "m",
            messages: &messages,
            stream: false,
            options: OllamaOptions {
                temperature: 0.0,
                num_predict: 64,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 64);
    }
}
