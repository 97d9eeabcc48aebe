//! Bounded retry and fallback over an ordered adapter list.
//!
//! The router drives an explicit state machine:
//!
//! ```text
//! Trying(adapter, attempt) ── ok ─────────────────────────▶ Success
//!        │ transient, attempt < budget ──▶ Retry(after) ──▶ Trying(adapter, attempt + 1)
//!        │ fatal, or budget spent ───────▶ NextAdapter ──▶ Trying(adapter + 1, 1) | Exhausted
//! ```
//!
//! Every path is bounded by `adapters × retry_budget` invocations.

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::humantime_duration;
use crate::providers::ProviderError;

/// Timeout and retry settings for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Per-invocation timeout
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    /// Invocations allowed per adapter, including the first
    pub retry_budget: u32,

    #[serde(with = "humantime_duration")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_duration")]
    pub backoff_max: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_budget: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

/// Position in the retry/fallback loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    /// Invoke `adapter`; `attempt` is 1-based
    Trying { adapter: usize, attempt: u32 },

    /// Wait `after`, then invoke the same adapter again
    Retry {
        adapter: usize,
        attempt: u32,
        after: Duration,
    },

    /// Give up on `adapter`
    NextAdapter { adapter: usize },

    Success,

    Exhausted,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Success | AttemptState::Exhausted)
    }
}

/// Transition table for one call.
#[derive(Debug, Clone)]
pub struct FallbackPlan {
    adapters: usize,
    retry_budget: u32,
    delays: Vec<Duration>,
    backoff_max: Duration,
}

impl FallbackPlan {
    pub fn new(adapters: usize, policy: &CallPolicy) -> Self {
        let retries = policy.retry_budget.saturating_sub(1) as usize;
        let delays = ExponentialBuilder::default()
            .with_min_delay(policy.backoff_base)
            .with_max_delay(policy.backoff_max)
            .with_max_times(retries)
            .build()
            .collect();

        Self {
            adapters,
            retry_budget: policy.retry_budget.max(1),
            delays,
            backoff_max: policy.backoff_max,
        }
    }

    pub fn start(&self) -> AttemptState {
        if self.adapters == 0 {
            AttemptState::Exhausted
        } else {
            AttemptState::Trying {
                adapter: 0,
                attempt: 1,
            }
        }
    }

    /// Next state after `attempt` on `adapter` failed with `error`.
    pub fn on_failure(&self, adapter: usize, attempt: u32, error: &ProviderError) -> AttemptState {
        if error.is_transient() && attempt < self.retry_budget {
            AttemptState::Retry {
                adapter,
                attempt,
                after: self.delay(attempt, error.retry_after()),
            }
        } else {
            AttemptState::NextAdapter { adapter }
        }
    }

    /// Follow a non-terminal waiting state to the next `Trying` or `Exhausted`.
    pub fn advance(&self, state: AttemptState) -> AttemptState {
        match state {
            AttemptState::Retry {
                adapter, attempt, ..
            } => AttemptState::Trying {
                adapter,
                attempt: attempt + 1,
            },
            AttemptState::NextAdapter { adapter } if adapter + 1 < self.adapters => {
                AttemptState::Trying {
                    adapter: adapter + 1,
                    attempt: 1,
                }
            }
            AttemptState::NextAdapter { .. } => AttemptState::Exhausted,
            other => other,
        }
    }

    /// Backoff before retry number `attempt` (1-based), honouring a
    /// server-suggested wait up to the configured cap.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        let backoff = self
            .delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        match retry_after {
            Some(wait) => backoff.max(wait).min(self.backoff_max),
            None => backoff,
        }
    }

    /// Upper bound on invocations for this plan.
    pub fn max_invocations(&self) -> usize {
        self.adapters * self.retry_budget as usize
    }
}
