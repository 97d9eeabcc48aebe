//! Runtime configuration.
//!
//! Loaded from YAML (or JSON). Every section has defaults, so a file only
//! needs the parts it changes:
//!
//! ```yaml
//! providers:
//!   claude: { kind: anthropic, model: claude-sonnet-4-5 }
//!   local:  { kind: ollama, base_url: "http://localhost:11434" }
//! capabilities:
//!   reasoning:
//!     providers: [claude, local]
//!     timeout: 45s
//!     retry_budget: 3
//! stages:
//!   analyst: reasoning
//! cache: { ttl: 6h }
//! scoring:
//!   weights: { growth: 0.5, infrastructure: 0.3, roi_percentile: 0.2 }
//! concurrency: { pool_size: 8 }
//! ```

use plotscout_core::{ScoringConfig, ScoringConfigError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::providers::{ProviderError, ProviderKind, ProviderRegistry};
use crate::resilience::{CallPolicy, CircuitBreakerConfig};

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Scoring(#[from] ScoringConfigError),

    #[error("Provider '{name}': {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },
}

/// Human-readable durations (`"30s"`, `"1h 30m"`) for serde.
pub mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// One configured adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Adapter-specific settings (`model`, `base_url`, `api_key`, ...)
    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: JsonValue) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    pub fn settings_value(&self) -> JsonValue {
        JsonValue::Object(self.settings.clone())
    }
}

/// Adapters and call policy for one capability class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Adapter names in preference order
    pub providers: Vec<String>,

    #[serde(default = "default_timeout", with = "humantime_duration")]
    pub timeout: Duration,

    /// Invocations per adapter, including the first
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default = "default_backoff_base", with = "humantime_duration")]
    pub backoff_base: Duration,

    #[serde(default = "default_backoff_max", with = "humantime_duration")]
    pub backoff_max: Duration,

    /// Default call parameters (`model`, `temperature`, `max_tokens`)
    #[serde(default)]
    pub params: Map<String, JsonValue>,
}

fn default_timeout() -> Duration {
    CallPolicy::default().timeout
}

fn default_retry_budget() -> u32 {
    CallPolicy::default().retry_budget
}

fn default_backoff_base() -> Duration {
    CallPolicy::default().backoff_base
}

fn default_backoff_max() -> Duration {
    CallPolicy::default().backoff_max
}

impl CapabilityConfig {
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let policy = CallPolicy::default();
        Self {
            providers: providers.into_iter().map(Into::into).collect(),
            timeout: policy.timeout,
            retry_budget: policy.retry_budget,
            backoff_base: policy.backoff_base,
            backoff_max: policy.backoff_max,
            params: Map::new(),
        }
    }

    pub fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.timeout,
            retry_budget: self.retry_budget,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
        }
    }
}

/// Capability used by each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageCapabilities {
    pub collector: String,
    pub analyst: String,
    pub advisor: String,
}

impl Default for StageCapabilities {
    fn default() -> Self {
        Self {
            collector: "summarization".to_string(),
            analyst: "reasoning".to_string(),
            advisor: "reasoning".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,

    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Bound on scorer threads and concurrent prompts within a stage
    pub pool_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { pool_size: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Ranked areas shown to the advisor
    pub top_n: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self { top_n: 10 }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub capabilities: BTreeMap<String, CapabilityConfig>,
    pub stages: StageCapabilities,
    pub cache: CacheConfig,
    pub scoring: ScoringConfig,
    pub concurrency: ConcurrencyConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub advisor: AdvisorConfig,
}

impl RuntimeConfig {
    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Check internal consistency.
    ///
    /// Stage capabilities are checked when a pipeline is built, so a file
    /// holding only scoring settings is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;

        if self.concurrency.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.pool_size must be at least 1".to_string(),
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::Invalid("cache.ttl must be positive".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if self.advisor.top_n == 0 {
            return Err(ConfigError::Invalid("advisor.top_n must be at least 1".to_string()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        for (name, capability) in &self.capabilities {
            if capability.providers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "capability '{}' lists no providers",
                    name
                )));
            }
            if let Some(unknown) = capability
                .providers
                .iter()
                .find(|p| !self.providers.contains_key(p.as_str()))
            {
                return Err(ConfigError::Invalid(format!(
                    "capability '{}' references unknown provider '{}'",
                    name, unknown
                )));
            }
            if capability.retry_budget == 0 {
                return Err(ConfigError::Invalid(format!(
                    "capability '{}': retry_budget must be at least 1",
                    name
                )));
            }
            if capability.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "capability '{}': timeout must be positive",
                    name
                )));
            }
            if capability.backoff_base > capability.backoff_max {
                return Err(ConfigError::Invalid(format!(
                    "capability '{}': backoff_base exceeds backoff_max",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Validate every provider's settings against the registry.
    pub fn validate_providers(&self, registry: &ProviderRegistry) -> Result<(), ConfigError> {
        for (name, provider) in &self.providers {
            registry
                .validate(provider.kind, &provider.settings_value())
                .map_err(|source| ConfigError::Provider {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
