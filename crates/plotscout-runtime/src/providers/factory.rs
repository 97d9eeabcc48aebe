//! Construction of adapters from configuration.
//!
//! The set of adapter kinds is closed ([`ProviderKind`]); each kind has a
//! factory that validates its settings block and builds an instance. HTTP
//! kinds are only registered when their cargo feature is enabled.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let adapter = registry.create(ProviderKind::Scripted, "demo", &settings)?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{LlmProvider, ProviderError};

/// Every adapter kind the runtime knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions (OpenAI, LocalAI, vLLM, ...)
    OpenAi,
    /// Local Ollama server
    Ollama,
    /// In-process replay of configured replies
    Scripted,
}

impl ProviderKind {
    /// Cargo feature that compiles the adapter in, if any.
    pub fn feature(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("anthropic"),
            ProviderKind::OpenAi => Some("openai"),
            ProviderKind::Ollama => Some("local"),
            ProviderKind::Scripted => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Scripted => write!(f, "scripted"),
        }
    }
}

/// Builds adapters of one kind.
pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create an adapter named `name` from its settings block.
    fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Validate settings without building an adapter.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Factories for the adapter kinds compiled into this build.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<ProviderKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one of the same kind.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn create(
        &self,
        kind: ProviderKind,
        name: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(kind)?.create(name, config)
    }

    pub fn validate(&self, kind: ProviderKind, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(kind)?.validate_config(config)
    }

    pub fn available_kinds(&self) -> Vec<ProviderKind> {
        self.factories.keys().copied().collect()
    }

    pub fn has_kind(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    fn factory(&self, kind: ProviderKind) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(&kind).ok_or_else(|| {
            let hint = kind
                .feature()
                .map(|f| format!(" (enable the '{}' feature)", f))
                .unwrap_or_default();
            ProviderError::NotConfigured(format!(
                "Provider kind '{}' is not available in this build{}",
                kind, hint
            ))
        })
    }

    /// A registry with every adapter kind compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::ScriptedProviderFactory));

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));

        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));

        #[cfg(feature = "local")]
        registry.register(Arc::new(super::OllamaProviderFactory));

        registry
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.available_kinds())
            .finish()
    }
}
