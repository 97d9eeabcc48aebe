//! Token usage accounting.
//!
//! Usage is accumulated per capability so a run report can show where the
//! tokens (and the money) went.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::providers::TokenUsage;

/// Accumulated LLM usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Provider invocations that returned a reply
    pub llm_calls: u32,

    /// Requests answered from the response cache
    pub cached_responses: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Tokens written to the provider-side prompt cache
    pub cache_creation_tokens: u64,

    /// Tokens read from the provider-side prompt cache
    pub cache_read_tokens: u64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        self.cache_creation_tokens += u64::from(usage.cache_creation_tokens);
        self.cache_read_tokens += u64::from(usage.cache_read_tokens);
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    pub fn record_cache_hit(&mut self) {
        self.cached_responses += 1;
    }

    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.cached_responses += other.cached_responses;
        self.estimated_cost += other.estimated_cost;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens: input, output, cache write, cache read
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("sonnet") => (3.0, 15.0, 3.75, 0.3),
            m if m.contains("opus") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku") => (1.0, 5.0, 1.25, 0.1),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.0, 0.0),
            m if m.contains("gpt-4o") => (2.5, 10.0, 0.0, 0.0),
            // Local and scripted models
            _ => (0.0, 0.0, 0.0, 0.0),
        };

        let per_million = |tokens: u32, rate: f64| (f64::from(tokens) / 1_000_000.0) * rate;
        per_million(usage.prompt_tokens, input_rate)
            + per_million(usage.completion_tokens, output_rate)
            + per_million(usage.cache_creation_tokens, cache_write_rate)
            + per_million(usage.cache_read_tokens, cache_read_rate)
    }
}

/// Usage per capability.
#[derive(Debug, Default)]
pub struct UsageTracker {
    by_capability: RwLock<BTreeMap<String, LlmUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, capability: &str, usage: &TokenUsage, model: &str) {
        self.by_capability
            .write()
            .entry(capability.to_string())
            .or_default()
            .add(usage, model);
    }

    pub fn record_cache_hit(&self, capability: &str) {
        self.by_capability
            .write()
            .entry(capability.to_string())
            .or_default()
            .record_cache_hit();
    }

    pub fn by_capability(&self) -> BTreeMap<String, LlmUsage> {
        self.by_capability.read().clone()
    }

    /// Sum over all capabilities.
    pub fn total(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for usage in self.by_capability.read().values() {
            total.merge(usage);
        }
        total
    }

    pub fn reset(&self) {
        self.by_capability.write().clear();
    }
}
