//! Stage trait and common types.

use plotscout_core::{MarketSnapshot, ScoreTable};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::parsing::SchemaValidationError;
use crate::providers::ChatMessage;
use crate::router::RouterError;
use crate::run::StageArtifact;

/// Pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Collector,
    Analyst,
    Advisor,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Collector, StageId::Analyst, StageId::Advisor];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Collector => "collector",
            StageId::Analyst => "analyst",
            StageId::Advisor => "advisor",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that fail a stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error(transparent)]
    Router(RouterError),

    #[error("Output for '{key}' still invalid after corrective re-prompt: {error}")]
    InvalidOutput {
        key: String,
        error: SchemaValidationError,
    },

    #[error("Missing upstream artifact from {0}")]
    MissingInput(StageId),

    #[error("cancelled")]
    Cancelled,
}

impl From<RouterError> for StageError {
    fn from(error: RouterError) -> Self {
        match error {
            RouterError::Cancelled => StageError::Cancelled,
            other => StageError::Router(other),
        }
    }
}

/// One prompt a stage wants answered.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTask {
    /// Key the parsed output is stored under (city name, or `all`)
    pub key: String,

    pub messages: Vec<ChatMessage>,

    /// Hash of the data embedded in the prompt
    pub input_hash: String,
}

/// Read-only view of everything upstream of a stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub scores: &'a ScoreTable,
    pub artifacts: &'a BTreeMap<StageId, StageArtifact>,

    /// Ranked areas the advisor sees
    pub top_n: usize,
}

impl<'a> StageInput<'a> {
    pub fn artifact(&self, stage: StageId) -> Result<&'a StageArtifact, StageError> {
        self.artifacts
            .get(&stage)
            .ok_or(StageError::MissingInput(stage))
    }
}

/// A pipeline stage: prompts out, validated structure in.
///
/// Stages are pure apart from the calls the driver makes on their behalf;
/// they never modify upstream artifacts.
pub trait AgentStage: Send + Sync {
    fn id(&self) -> StageId;

    /// Capability class the stage's prompts are routed to.
    fn capability(&self) -> &str;

    /// Stages whose artifacts must exist before this one runs.
    fn dependencies(&self) -> &'static [StageId];

    /// Build the stage's prompts from upstream data.
    fn prompts(&self, input: &StageInput<'_>) -> Result<Vec<PromptTask>, StageError>;

    /// Semantic checks on a schema-valid output.
    fn check(
        &self,
        _key: &str,
        _output: &JsonValue,
        _input: &StageInput<'_>,
    ) -> Result<(), SchemaValidationError> {
        Ok(())
    }

    /// Combine per-task outputs (sorted by key) into the artifact output.
    fn assemble(&self, outputs: Vec<(String, JsonValue)>) -> JsonValue {
        let cities: serde_json::Map<String, JsonValue> = outputs.into_iter().collect();
        serde_json::json!({ "cities": cities })
    }
}
