//! OpenAI-compatible chat completions adapter.
//!
//! Works with OpenAI and any server exposing `/chat/completions` in the same
//! shape (LocalAI, vLLM, OpenRouter). The key is optional so local servers
//! without authentication work too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::factory::{ProviderFactory, ProviderKind};
use super::http;
use super::secrets::ApiCredential;
use super::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiProvider {
    name: String,
    credential: Option<ApiCredential>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn from_config(name: &str, config: &JsonValue) -> Result<Self, ProviderError> {
        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        // The hosted API always needs a key; self-hosted servers may not.
        let credential = if base_url == DEFAULT_BASE_URL {
            Some(ApiCredential::from_config_or_env(
                config,
                "api_key",
                OPENAI_API_KEY_ENV,
                "OpenAI API key",
            )?)
        } else {
            ApiCredential::optional(config, "api_key", OPENAI_API_KEY_ENV, "OpenAI API key")
        };

        Ok(Self {
            name: name.to_string(),
            credential,
            base_url,
            model: config["model"].as_str().unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let model = config.model.as_deref().unwrap_or(&self.model);
        let request = ChatRequest {
            model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        tracing::debug!(provider = %self.name, model = %model, "Sending chat completion request");

        let mut builder = http::client()
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(config.timeout)
            .json(&request);
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential.expose());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| http::send_error(e, config.timeout))?;
        let body: ChatResponse = http::decode(http::check_status(response).await?).await?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            ProviderError::MalformedResponse("response contained no choices".to_string())
        })?;
        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            ..Default::default()
        });

        Ok(CompletionResponse {
            content: http::non_empty(choice.message.content.unwrap_or_default())?,
            usage: usage.unwrap_or_default(),
            model: body.model,
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        self.credential.as_ref().map(|c| !c.is_empty()).unwrap_or(true)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Builds [`OpenAiProvider`]s.
///
/// ```yaml
/// kind: openai
/// base_url: http://localhost:8080/v1 # optional, hosted API by default
/// api_key: sk-...                    # optional, falls back to OPENAI_API_KEY
/// model: gpt-4o-mini
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(name, config)?))
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
        "OpenAI-compatible chat completions provider"
    }
}
