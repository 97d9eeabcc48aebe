//! In-process adapter that replays configured replies.
//!
//! Used for offline demo runs and as the test double for the router and
//! pipeline. Reply selection, in order:
//!
//! 1. the next queued reply, if any
//! 2. the first rule whose substrings all occur in the prompt
//! 3. the fallback reply
//!
//! With none of those the call fails as `Unavailable`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::factory::{ProviderFactory, ProviderKind};
use super::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    Error(ProviderError),
}

#[derive(Debug, Clone)]
struct Rule {
    contains: Vec<String>,
    reply: ScriptedReply,
}

/// Deterministic replay adapter.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    queue: Mutex<VecDeque<ScriptedReply>>,
    rules: Vec<Rule>,
    fallback: Option<ScriptedReply>,
    delay: Option<Duration>,
    invocations: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            rules: Vec::new(),
            fallback: None,
            delay: None,
            invocations: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(ScriptedReply::Text(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: ProviderError) -> Self {
        self.queue.lock().push_back(ScriptedReply::Error(error));
        self
    }

    /// Reply with `reply` whenever every substring occurs in the prompt.
    pub fn rule<I, S>(mut self, contains: I, reply: ScriptedReply) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(Rule {
            contains: contains.into_iter().map(Into::into).collect(),
            reply,
        });
        self
    }

    /// Reply used when neither the queue nor a rule applies.
    pub fn fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Sleep before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Prompts received so far, messages joined by newlines.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn select(&self, prompt: &str) -> Option<ScriptedReply> {
        if let Some(reply) = self.queue.lock().pop_front() {
            return Some(reply);
        }
        self.rules
            .iter()
            .find(|rule| rule.contains.iter().all(|s| prompt.contains(s.as_str())))
            .map(|rule| rule.reply.clone())
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().push(prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.select(&prompt) {
            Some(ScriptedReply::Text(content)) => Ok(CompletionResponse {
                usage: TokenUsage {
                    prompt_tokens: self.estimate_tokens(&prompt),
                    completion_tokens: self.estimate_tokens(&content),
                    ..Default::default()
                },
                content,
                model: "scripted".to_string(),
                stop_reason: Some("end_turn".to_string()),
            }),
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(ProviderError::Unavailable(format!(
                "scripted provider '{}' has no reply for this prompt",
                self.name
            ))),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Error kinds a scripted reply can simulate.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ErrorSpec {
    Timeout,
    RateLimited,
    AuthFailure,
    Unavailable,
    MalformedResponse,
}

impl ErrorSpec {
    fn into_error(self) -> ProviderError {
        match self {
            ErrorSpec::Timeout => ProviderError::Timeout(Duration::from_secs(0)),
            ErrorSpec::RateLimited => ProviderError::RateLimited { retry_after: None },
            ErrorSpec::AuthFailure => ProviderError::AuthFailure("scripted".to_string()),
            ErrorSpec::Unavailable => ProviderError::Unavailable("scripted".to_string()),
            ErrorSpec::MalformedResponse => {
                ProviderError::MalformedResponse("scripted".to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplySpec {
    Error { error: ErrorSpec },
    Text(String),
}

impl ReplySpec {
    fn into_reply(self) -> ScriptedReply {
        match self {
            ReplySpec::Text(text) => ScriptedReply::Text(text),
            ReplySpec::Error { error } => ScriptedReply::Error(error.into_error()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    contains: Vec<String>,
    reply: ReplySpec,
}

/// Settings block of a `scripted` provider.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptedSettings {
    replies: Vec<ReplySpec>,
    rules: Vec<RuleSpec>,
    fallback: Option<ReplySpec>,
    delay: Option<String>,
}

impl ScriptedSettings {
    fn parse(config: &JsonValue) -> Result<Self, ProviderError> {
        // `kind` and other shared keys sit next to the scripted settings.
        let mut config = config.clone();
        if let Some(map) = config.as_object_mut() {
            map.retain(|k, _| matches!(k.as_str(), "replies" | "rules" | "fallback" | "delay"));
        }
        serde_json::from_value(config)
            .map_err(|e| ProviderError::NotConfigured(format!("invalid scripted settings: {}", e)))
    }
}

/// Builds [`ScriptedProvider`]s.
///
/// ```yaml
/// kind: scripted
/// delay: 50ms
/// replies: ["first reply", { error: timeout }]
/// rules:
///   - contains: ["Stage: collector", "City: Pune"]
///     reply: '{"summary": "..."}'
/// fallback: { error: unavailable }
/// ```
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scripted
    }

    fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let settings = ScriptedSettings::parse(config)?;

        let mut provider = ScriptedProvider::new(name);
        for reply in settings.replies {
            provider = match reply.into_reply() {
                ScriptedReply::Text(text) => provider.reply(text),
                ScriptedReply::Error(error) => provider.fail(error),
            };
        }
        for rule in settings.rules {
            provider = provider.rule(rule.contains, rule.reply.into_reply());
        }
        if let Some(fallback) = settings.fallback {
            provider = provider.fallback(fallback.into_reply());
        }
        if let Some(delay) = settings.delay {
            let delay = humantime::parse_duration(&delay).map_err(|e| {
                ProviderError::NotConfigured(format!("invalid scripted delay '{}': {}", delay, e))
            })?;
            provider = provider.with_delay(delay);
        }

        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ScriptedSettings::parse(config).map(|_| ())
    }

    fn description(&self) -> &'static str {
        "Scripted replies for offline demos and tests"
    }
}
