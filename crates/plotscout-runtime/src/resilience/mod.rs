//! Resilience patterns for plotscout-runtime.
//!
//! This module provides:
//! - A per-adapter circuit breaker
//! - The bounded retry/fallback state machine driven by the router
//! - Token usage and cost accounting per capability

mod budget;
mod circuit_breaker;
mod fallback;

pub use budget::{LlmUsage, UsageTracker};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback::{AttemptState, CallPolicy, FallbackPlan};
