//! Circuit breaker over provider adapters.
//!
//! An adapter that keeps failing is skipped by the router until a recovery
//! timeout has passed, then probed again in half-open state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::humantime_duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls before the circuit opens
    pub failure_threshold: u32,

    /// Time before a half-open probe is allowed
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,

    /// Successful probes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Adapter is skipped
    Open { opened_at: Instant },

    /// Probing whether the adapter recovered
    HalfOpen { successes: u32 },
}

/// One circuit per adapter name.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `adapter` should be skipped right now.
    ///
    /// An open circuit whose recovery timeout has passed moves to half-open
    /// and lets the call through.
    pub fn is_open(&self, adapter: &str) -> bool {
        let mut states = self.states.write();
        match states.get(adapter) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    states.insert(adapter.to_string(), CircuitState::HalfOpen { successes: 0 });
                    tracing::info!(adapter, "Circuit half-open, probing adapter");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, adapter: &str) {
        let mut states = self.states.write();
        match states.get(adapter).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(adapter.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(adapter, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        adapter.to_string(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(adapter.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, adapter: &str) {
        let mut states = self.states.write();
        let failures = match states.get(adapter) {
            Some(CircuitState::Closed { failures }) => *failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    adapter.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(adapter, "Circuit reopened after failed probe");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                adapter.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(adapter, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(adapter.to_string(), CircuitState::Closed { failures });
        }
    }

    pub fn state(&self, adapter: &str) -> CircuitState {
        self.states
            .read()
            .get(adapter)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
