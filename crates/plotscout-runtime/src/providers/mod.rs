//! Provider adapters for plotscout-runtime.
//!
//! This module defines the uniform call contract every model backend
//! implements, and the closed set of adapters shipped with the crate:
//! Anthropic, OpenAI-compatible servers, Ollama and an in-process
//! scripted adapter.
//!
//! Adapters carry no retry logic. Retry, timeout and fallback belong to the
//! [`ProviderRouter`](crate::router::ProviderRouter).
//!
//! ## Security
//!
//! HTTP adapters hold their keys in [`ApiCredential`], which never appears in
//! `Debug` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod scripted;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "local")]
mod ollama;

pub use factory::{ProviderFactory, ProviderKind, ProviderRegistry};
pub use scripted::{ScriptedProvider, ScriptedProviderFactory, ScriptedReply};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

#[cfg(feature = "local")]
pub use ollama::{OllamaProvider, OllamaProviderFactory};

/// Errors from a single adapter invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient errors are worth retrying on the same adapter.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Unavailable(_)
        )
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    /// Model override; adapters use their configured model when `None`
    pub model: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,

    /// Enable prompt caching (Anthropic-specific)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            prompt_caching: true,
        }
    }
}

impl CompletionConfig {
    /// Build from call parameters. Unknown keys are ignored here; they still
    /// take part in the request fingerprint.
    pub fn from_params(params: &JsonValue, timeout: Duration) -> Self {
        let defaults = Self::default();
        Self {
            model: params["model"].as_str().map(str::to_string),
            max_tokens: params["max_tokens"]
                .as_u64()
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_tokens),
            temperature: params["temperature"]
                .as_f64()
                .map(|v| v as f32)
                .unwrap_or(defaults.temperature),
            timeout,
            prompt_caching: params["prompt_caching"]
                .as_bool()
                .unwrap_or(defaults.prompt_caching),
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    #[serde(default)]
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Uniform call contract over one model backend.
///
/// Implementations make exactly one remote (or in-process) call per
/// `complete` and map every failure onto a [`ProviderError`] kind.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Configured adapter name, unique within a router.
    fn name(&self) -> &str;

    /// Default model used when the call does not override it.
    fn model(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimate: ~4 chars per token
        (text.len() / 4) as u32
    }
}
