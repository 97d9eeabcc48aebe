//! Capability-based provider routing.
//!
//! A capability class (`summarization`, `reasoning`, ...) maps to an ordered
//! list of adapters. [`ProviderRouter::call`] serves a request from the
//! response cache when it can; otherwise it walks the adapters with bounded
//! retries (see [`FallbackPlan`]) and caches the first success.
//!
//! Concurrent calls with the same fingerprint share one provider
//! invocation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{CachedResponse, ResponseCache};
use crate::config::{ConfigError, RuntimeConfig};
use crate::fingerprint::Fingerprint;
use crate::ledger::{CallLedger, ProviderCallRecord};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry,
};
use crate::resilience::{
    AttemptState, CallPolicy, CircuitBreaker, CircuitBreakerConfig, FallbackPlan, UsageTracker,
};

/// Why one attempt did not produce a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    AuthFailure,
    Unavailable,
    MalformedResponse,
    NotConfigured,
    /// Adapter skipped by the circuit breaker
    CircuitOpen,
}

impl From<&ProviderError> for FailureKind {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::Timeout(_) => FailureKind::Timeout,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::AuthFailure(_) => FailureKind::AuthFailure,
            ProviderError::Unavailable(_) => FailureKind::Unavailable,
            ProviderError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ProviderError::NotConfigured(_) => FailureKind::NotConfigured,
        }
    }
}

/// One failed attempt in a call's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub adapter: String,

    /// 1-based attempt on this adapter; 0 when the adapter was skipped
    pub attempt: u32,

    pub kind: FailureKind,

    pub message: String,
}

impl AttemptFailure {
    fn from_error(adapter: &str, attempt: u32, error: &ProviderError) -> Self {
        Self {
            adapter: adapter.to_string(),
            attempt,
            kind: error.into(),
            message: error.to_string(),
        }
    }

    fn circuit_open(adapter: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            attempt: 0,
            kind: FailureKind::CircuitOpen,
            message: "circuit open, adapter skipped".to_string(),
        }
    }
}

/// Errors from [`ProviderRouter::call`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("All providers exhausted for '{capability}' after {} failed attempts", .history.len())]
    AllProvidersExhausted {
        capability: String,
        history: Vec<AttemptFailure>,
    },

    #[error("Cancelled before a provider was invoked")]
    Cancelled,
}

/// Adapters and policy behind one capability.
#[derive(Clone)]
pub struct CapabilityRoute {
    providers: Vec<Arc<dyn LlmProvider>>,
    policy: CallPolicy,
    params: Map<String, JsonValue>,
}

impl CapabilityRoute {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, policy: CallPolicy) -> Self {
        Self {
            providers,
            policy,
            params: Map::new(),
        }
    }

    /// Default parameters, overridden key by key by call parameters.
    pub fn with_params(mut self, params: Map<String, JsonValue>) -> Self {
        self.params = params;
        self
    }

    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    fn merged_params(&self, params: &JsonValue) -> JsonValue {
        let mut merged = self.params.clone();
        if let Some(overrides) = params.as_object() {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        JsonValue::Object(merged)
    }
}

impl std::fmt::Debug for CapabilityRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CapabilityRoute")
            .field("providers", &names)
            .field("policy", &self.policy)
            .field("params", &self.params)
            .finish()
    }
}

/// Per-run state a call reads and writes.
#[derive(Debug, Clone, Copy)]
pub struct CallScope<'a> {
    pub ledger: &'a CallLedger,
    pub cancel: &'a CancellationToken,
}

/// Text of a served request and the record describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub text: String,
    pub record: ProviderCallRecord,
}

/// Routes capability calls to adapters.
#[derive(Debug)]
pub struct ProviderRouter {
    routes: BTreeMap<String, CapabilityRoute>,
    cache: Arc<ResponseCache>,
    breaker: CircuitBreaker,
    usage: UsageTracker,
}

impl ProviderRouter {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self {
            routes: BTreeMap::new(),
            cache,
            breaker: CircuitBreaker::default(),
            usage: UsageTracker::new(),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    pub fn with_route(mut self, capability: impl Into<String>, route: CapabilityRoute) -> Self {
        self.add_route(capability, route);
        self
    }

    pub fn add_route(&mut self, capability: impl Into<String>, route: CapabilityRoute) {
        self.routes.insert(capability.into(), route);
    }

    /// Build adapters and routes from configuration.
    ///
    /// Each named adapter is created once and shared between the
    /// capabilities that list it.
    pub fn from_config(
        config: &RuntimeConfig,
        registry: &ProviderRegistry,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut adapters: BTreeMap<&str, Arc<dyn LlmProvider>> = BTreeMap::new();
        for (name, provider) in &config.providers {
            let adapter = registry
                .create(provider.kind, name, &provider.settings_value())
                .map_err(|source| ConfigError::Provider {
                    name: name.clone(),
                    source,
                })?;
            adapters.insert(name.as_str(), adapter);
        }

        let mut router =
            Self::new(cache).with_circuit_breaker(config.circuit_breaker.clone());
        for (capability, settings) in &config.capabilities {
            let providers = settings
                .providers
                .iter()
                .map(|name| {
                    adapters.get(name.as_str()).cloned().ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "capability '{}' references unknown provider '{}'",
                            capability, name
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            router.add_route(
                capability.clone(),
                CapabilityRoute::new(providers, settings.policy()).with_params(settings.params.clone()),
            );
        }

        tracing::info!(
            capabilities = router.routes.len(),
            adapters = adapters.len(),
            "Provider router configured"
        );
        Ok(router)
    }

    pub fn route(&self, capability: &str) -> Option<&CapabilityRoute> {
        self.routes.get(capability)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.routes.contains_key(capability)
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Serve one request.
    ///
    /// `params` may carry any keys; all of them take part in the
    /// fingerprint. A `stage` key is copied onto the call record.
    pub async fn call(
        &self,
        capability: &str,
        messages: &[ChatMessage],
        params: &JsonValue,
        scope: &CallScope<'_>,
    ) -> Result<CallOutcome, RouterError> {
        let route = self
            .routes
            .get(capability)
            .ok_or_else(|| RouterError::UnknownCapability(capability.to_string()))?;

        let params = route.merged_params(params);
        let fingerprint = Fingerprint::compute(capability, messages, &params);
        let stage = params["stage"].as_str().map(str::to_string);

        if let Some(hit) = self.cache.get(&fingerprint).await {
            tracing::debug!(capability, fingerprint = %fingerprint.short(), "Cache hit");
            return Ok(self.serve_cached(capability, stage, &fingerprint, hit, scope));
        }

        if scope.cancel.is_cancelled() {
            return Err(RouterError::Cancelled);
        }

        let fetched = self
            .cache
            .get_or_fetch(&fingerprint, || {
                self.invoke(route, capability, messages, &params, &fingerprint, stage.clone(), scope)
            })
            .await;

        match fetched {
            Ok((response, true)) => {
                let record = scope.ledger.get(&fingerprint).unwrap_or_else(|| {
                    ProviderCallRecord::cache_hit(
                        fingerprint.clone(),
                        capability,
                        stage,
                        &response.provider,
                        &response.model,
                    )
                });
                Ok(CallOutcome {
                    text: response.text,
                    record,
                })
            }
            Ok((response, false)) => {
                tracing::debug!(
                    capability,
                    fingerprint = %fingerprint.short(),
                    "Joined in-flight request"
                );
                Ok(self.serve_cached(capability, stage, &fingerprint, response, scope))
            }
            Err(error) => Err((*error).clone()),
        }
    }

    fn serve_cached(
        &self,
        capability: &str,
        stage: Option<String>,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        scope: &CallScope<'_>,
    ) -> CallOutcome {
        self.usage.record_cache_hit(capability);
        let record = scope.ledger.get_or_insert_with(fingerprint, || {
            ProviderCallRecord::cache_hit(
                fingerprint.clone(),
                capability,
                stage,
                &response.provider,
                &response.model,
            )
        });
        CallOutcome {
            text: response.text,
            record,
        }
    }

    /// Walk the adapters until one replies or the plan is exhausted.
    ///
    /// Runs inside the cache's init future, so the ledger record is in place
    /// before any waiting caller reads it.
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        route: &CapabilityRoute,
        capability: &str,
        messages: &[ChatMessage],
        params: &JsonValue,
        fingerprint: &Fingerprint,
        stage: Option<String>,
        scope: &CallScope<'_>,
    ) -> Result<CachedResponse, RouterError> {
        let plan = FallbackPlan::new(route.providers.len(), &route.policy);
        let config = CompletionConfig::from_params(params, route.policy.timeout);
        let called_at = Utc::now();
        let started = Instant::now();

        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut attempts = 0u32;
        let mut reply: Option<CachedResponse> = None;
        let mut cancelled = false;
        let mut state = plan.start();

        while !state.is_terminal() {
            state = match state {
                AttemptState::Trying { adapter, attempt } => {
                    let provider = &route.providers[adapter];
                    let name = provider.name();

                    if attempt == 1 && self.breaker.is_open(name) {
                        tracing::warn!(capability, adapter = name, "Circuit open, skipping adapter");
                        failures.push(AttemptFailure::circuit_open(name));
                        plan.advance(AttemptState::NextAdapter { adapter })
                    } else if scope.cancel.is_cancelled() {
                        cancelled = true;
                        AttemptState::Exhausted
                    } else {
                        attempts += 1;
                        let result = match tokio::time::timeout(
                            route.policy.timeout,
                            provider.complete(messages.to_vec(), &config),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(ProviderError::Timeout(route.policy.timeout)),
                        };

                        match result {
                            Ok(response) => {
                                self.breaker.record_success(name);
                                self.usage.record(capability, &response.usage, &response.model);
                                reply = Some(CachedResponse {
                                    text: response.content,
                                    provider: name.to_string(),
                                    model: response.model,
                                    usage: response.usage,
                                    cached_at: Utc::now(),
                                });
                                AttemptState::Success
                            }
                            Err(error) => {
                                failures.push(AttemptFailure::from_error(name, attempt, &error));
                                let next = plan.on_failure(adapter, attempt, &error);
                                match &next {
                                    AttemptState::Retry { after, .. } => tracing::warn!(
                                        capability,
                                        adapter = name,
                                        attempt,
                                        error = %error,
                                        backoff_ms = after.as_millis() as u64,
                                        "Provider call failed, retrying"
                                    ),
                                    _ => {
                                        self.breaker.record_failure(name);
                                        tracing::warn!(
                                            capability,
                                            adapter = name,
                                            attempt,
                                            error = %error,
                                            "Provider call failed, falling back"
                                        );
                                    }
                                }
                                next
                            }
                        }
                    }
                }
                AttemptState::Retry {
                    adapter,
                    attempt,
                    after,
                } => {
                    tokio::select! {
                        _ = scope.cancel.cancelled() => {
                            cancelled = true;
                            AttemptState::Exhausted
                        }
                        _ = tokio::time::sleep(after) => {
                            plan.advance(AttemptState::Retry { adapter, attempt, after })
                        }
                    }
                }
                next @ AttemptState::NextAdapter { .. } => plan.advance(next),
                terminal => terminal,
            };
        }

        let success = reply.is_some();
        if attempts > 0 || !failures.is_empty() {
            scope.ledger.upsert(ProviderCallRecord {
                fingerprint: fingerprint.clone(),
                capability: capability.to_string(),
                stage,
                provider: reply.as_ref().map(|r| r.provider.clone()),
                model: reply.as_ref().map(|r| r.model.clone()),
                attempts,
                latency_ms: started.elapsed().as_millis() as u64,
                success,
                served_from_cache: false,
                cache_key: success.then(|| fingerprint.clone()),
                usage: reply.as_ref().map(|r| r.usage.clone()).unwrap_or_default(),
                called_at,
                failures: failures.clone(),
            });
        }

        match reply {
            Some(reply) => Ok(reply),
            None if cancelled => {
                tracing::info!(capability, attempts, "Call cancelled");
                Err(RouterError::Cancelled)
            }
            None => {
                tracing::error!(
                    capability,
                    fingerprint = %fingerprint.short(),
                    attempts,
                    "All providers exhausted"
                );
                Err(RouterError::AllProvidersExhausted {
                    capability: capability.to_string(),
                    history: failures,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use serde_json::json;
    use std::time::Duration;

    fn policy(retry_budget: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(5),
            retry_budget,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }

    fn router(providers: Vec<Arc<ScriptedProvider>>, retry_budget: u32) -> ProviderRouter {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn LlmProvider>)
            .collect();
        ProviderRouter::new(Arc::new(ResponseCache::default()))
            .with_route("reasoning", CapabilityRoute::new(providers, policy(retry_budget)))
    }

    async fn ask(router: &ProviderRouter, ledger: &CallLedger, prompt: &str) -> Result<CallOutcome, RouterError> {
        let cancel = CancellationToken::new();
        let scope = CallScope {
            ledger,
            cancel: &cancel,
        };
        router
            .call("reasoning", &[ChatMessage::user(prompt)], &json!({"stage": "analyst"}), &scope)
            .await
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let primary = Arc::new(ScriptedProvider::new("primary").fallback(ScriptedReply::Text("hi".into())));
        let router = router(vec![primary.clone()], 2);
        let ledger = CallLedger::new();

        let first = ask(&router, &ledger, "hello").await.unwrap();
        let second = ask(&router, &ledger, "hello").await.unwrap();

        assert_eq!(first.text, "hi");
        assert_eq!(second.text, "hi");
        assert_eq!(primary.invocations(), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(first.record, second.record);
        assert_eq!(first.record.stage.as_deref(), Some("analyst"));
        assert_eq!(router.usage().by_capability()["reasoning"].cached_responses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_invoke_once() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fallback(ScriptedReply::Text("shared".into()))
                .with_delay(Duration::from_millis(30)),
        );
        let router = router(vec![primary.clone()], 2);
        let ledger = CallLedger::new();

        let calls = (0..6).map(|_| ask(&router, &ledger, "same prompt"));
        let outcomes = futures::future::join_all(calls).await;

        assert!(outcomes.iter().all(|o| o.as_ref().unwrap().text == "shared"));
        assert_eq!(primary.invocations(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_with_backoff() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fail(ProviderError::Unavailable("503".into()))
                .reply("recovered"),
        );
        let router = router(vec![primary.clone()], 2);
        let ledger = CallLedger::new();

        let started = Instant::now();
        let outcome = ask(&router, &ledger, "hello").await.unwrap();

        assert_eq!(outcome.text, "recovered");
        assert_eq!(primary.invocations(), 2);
        assert_eq!(outcome.record.attempts, 2);
        assert_eq!(outcome.record.failures.len(), 1);
        assert_eq!(outcome.record.failures[0].kind, FailureKind::Unavailable);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honours_retry_after() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fail(ProviderError::RateLimited {
                    retry_after: Some(Duration::from_millis(1500)),
                })
                .reply("ok"),
        );
        let router = router(vec![primary], 2);
        let ledger = CallLedger::new();

        let started = Instant::now();
        ask(&router, &ledger, "hello").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_fatal_error_falls_through_without_retry() {
        let primary = Arc::new(ScriptedProvider::new("primary").fail(ProviderError::AuthFailure("401".into())));
        let backup = Arc::new(ScriptedProvider::new("backup").reply("from backup"));
        let router = router(vec![primary.clone(), backup.clone()], 3);
        let ledger = CallLedger::new();

        let outcome = ask(&router, &ledger, "hello").await.unwrap();

        assert_eq!(outcome.text, "from backup");
        assert_eq!(primary.invocations(), 1);
        assert_eq!(backup.invocations(), 1);
        assert_eq!(outcome.record.provider.as_deref(), Some("backup"));
        assert_eq!(outcome.record.failures[0].kind, FailureKind::AuthFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_history() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fallback(ScriptedReply::Error(ProviderError::Unavailable("down".into()))),
        );
        let backup = Arc::new(
            ScriptedProvider::new("backup")
                .fallback(ScriptedReply::Error(ProviderError::MalformedResponse("junk".into()))),
        );
        let router = router(vec![primary.clone(), backup.clone()], 2);
        let ledger = CallLedger::new();

        let err = ask(&router, &ledger, "hello").await.unwrap_err();
        match err {
            RouterError::AllProvidersExhausted { capability, history } => {
                assert_eq!(capability, "reasoning");
                let summary: Vec<(&str, u32, FailureKind)> = history
                    .iter()
                    .map(|f| (f.adapter.as_str(), f.attempt, f.kind))
                    .collect();
                assert_eq!(
                    summary,
                    vec![
                        ("primary", 1, FailureKind::Unavailable),
                        ("primary", 2, FailureKind::Unavailable),
                        ("backup", 1, FailureKind::MalformedResponse),
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(primary.invocations(), 2);
        assert_eq!(backup.invocations(), 1);

        let records = ledger.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out_then_falls_back() {
        let slow = Arc::new(
            ScriptedProvider::new("slow")
                .fallback(ScriptedReply::Text("too late".into()))
                .with_delay(Duration::from_secs(30)),
        );
        let backup = Arc::new(ScriptedProvider::new("backup").reply("on time"));
        let router = router(vec![slow.clone(), backup.clone()], 2);
        let ledger = CallLedger::new();

        let started = Instant::now();
        let outcome = ask(&router, &ledger, "hello").await.unwrap();

        assert_eq!(outcome.text, "on time");
        assert_eq!(slow.invocations(), 2);
        assert_eq!(backup.invocations(), 1);
        assert_eq!(outcome.record.provider.as_deref(), Some("backup"));
        assert_eq!(outcome.record.attempts, 3);
        let history: Vec<(&str, u32, FailureKind)> = outcome
            .record
            .failures
            .iter()
            .map(|f| (f.adapter.as_str(), f.attempt, f.kind))
            .collect();
        assert_eq!(
            history,
            vec![
                ("slow", 1, FailureKind::Timeout),
                ("slow", 2, FailureKind::Timeout),
            ]
        );
        // Two 5s timeouts plus one backoff, never the adapter's full delay
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fail(ProviderError::AuthFailure("401".into()))
                .reply("second time lucky"),
        );
        let router = router(vec![primary.clone()], 1);
        let ledger = CallLedger::new();

        assert!(ask(&router, &ledger, "hello").await.is_err());
        let outcome = ask(&router, &ledger, "hello").await.unwrap();
        assert_eq!(outcome.text, "second time lucky");
        assert_eq!(ledger.len(), 1);
        assert!(ledger.records()[0].success);
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let router = router(vec![], 1);
        let ledger = CallLedger::new();
        let cancel = CancellationToken::new();
        let scope = CallScope {
            ledger: &ledger,
            cancel: &cancel,
        };
        let err = router
            .call("translation", &[ChatMessage::user("x")], &json!({}), &scope)
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::UnknownCapability("translation".into()));
    }

    #[tokio::test]
    async fn test_cancelled_call_serves_cache_only() {
        let primary = Arc::new(ScriptedProvider::new("primary").fallback(ScriptedReply::Text("cached".into())));
        let router = router(vec![primary.clone()], 1);
        let ledger = CallLedger::new();
        ask(&router, &ledger, "warm").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let scope = CallScope {
            ledger: &ledger,
            cancel: &cancel,
        };
        let params = json!({"stage": "analyst"});

        let hit = router
            .call("reasoning", &[ChatMessage::user("warm")], &params, &scope)
            .await
            .unwrap();
        assert_eq!(hit.text, "cached");

        let miss = router
            .call("reasoning", &[ChatMessage::user("cold")], &params, &scope)
            .await;
        assert_eq!(miss.unwrap_err(), RouterError::Cancelled);
        assert_eq!(primary.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .fallback(ScriptedReply::Error(ProviderError::Unavailable("down".into()))),
        );
        let router = router(vec![primary.clone()], 5);
        let ledger = CallLedger::new();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        };
        let scope = CallScope {
            ledger: &ledger,
            cancel: &cancel,
        };
        let messages = [ChatMessage::user("x")];
        let schema = json!({});
        let call = router.call("reasoning", &messages, &schema, &scope);
        let (result, _) = tokio::join!(call, canceller);

        assert_eq!(result.unwrap_err(), RouterError::Cancelled);
        assert_eq!(primary.invocations(), 1);
        assert_eq!(ledger.records()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_adapter() {
        let primary = Arc::new(ScriptedProvider::new("primary").fallback(ScriptedReply::Text("p".into())));
        let backup = Arc::new(ScriptedProvider::new("backup").fallback(ScriptedReply::Text("b".into())));
        let router = router(vec![primary.clone(), backup.clone()], 1).with_circuit_breaker(
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        router.circuit_breaker().record_failure("primary");

        let ledger = CallLedger::new();
        let outcome = ask(&router, &ledger, "hello").await.unwrap();
        assert_eq!(outcome.text, "b");
        assert_eq!(primary.invocations(), 0);
        assert_eq!(outcome.record.failures[0].kind, FailureKind::CircuitOpen);
    }

    #[tokio::test]
    async fn test_route_params_merge_into_fingerprint() {
        let primary = Arc::new(ScriptedProvider::new("primary").fallback(ScriptedReply::Text("x".into())));
        let mut defaults = Map::new();
        defaults.insert("temperature".into(), json!(0.0));
        let router = ProviderRouter::new(Arc::new(ResponseCache::default())).with_route(
            "reasoning",
            CapabilityRoute::new(vec![primary.clone() as Arc<dyn LlmProvider>], policy(1))
                .with_params(defaults),
        );
        let ledger = CallLedger::new();
        let cancel = CancellationToken::new();
        let scope = CallScope {
            ledger: &ledger,
            cancel: &cancel,
        };
        let messages = [ChatMessage::user("hello")];

        let implicit = router.call("reasoning", &messages, &json!({}), &scope).await.unwrap();
        let explicit = router
            .call("reasoning", &messages, &json!({"temperature": 0.0}), &scope)
            .await
            .unwrap();
        let warmer = router
            .call("reasoning", &messages, &json!({"temperature": 0.7}), &scope)
            .await
            .unwrap();

        assert_eq!(implicit.record.fingerprint, explicit.record.fingerprint);
        assert_ne!(implicit.record.fingerprint, warmer.record.fingerprint);
        assert_eq!(primary.invocations(), 2);
    }

    #[test]
    fn test_from_config_builds_routes() {
        let config = RuntimeConfig::from_yaml(
            r#"
providers:
  a: { kind: scripted, fallback: "A" }
  b: { kind: scripted }
capabilities:
  reasoning: { providers: [a, b], retry_budget: 3 }
  summarization: { providers: [b] }
"#,
        )
        .unwrap();
        let router = ProviderRouter::from_config(
            &config,
            &ProviderRegistry::with_defaults(),
            Arc::new(ResponseCache::default()),
        )
        .unwrap();

        assert_eq!(router.capabilities().collect::<Vec<_>>(), vec!["reasoning", "summarization"]);
        let route = router.route("reasoning").unwrap();
        assert_eq!(route.providers().len(), 2);
        assert_eq!(route.providers()[0].name(), "a");
        assert_eq!(route.policy().retry_budget, 3);
    }
}
