//! Advisor stage: strategy recommendations over the top-ranked areas.

use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;

use super::analyst::score_row;
use super::parsing::SchemaValidationError;
use super::prompts::build_task;
use super::traits::{AgentStage, PromptTask, StageError, StageId, StageInput};

/// Key of the advisor's single prompt.
pub const ADVISOR_TASK_KEY: &str = "all";

#[derive(Debug, Clone)]
pub struct AdvisorStage {
    capability: String,
}

impl AdvisorStage {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

impl AgentStage for AdvisorStage {
    fn id(&self) -> StageId {
        StageId::Advisor
    }

    fn capability(&self) -> &str {
        &self.capability
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Analyst]
    }

    fn prompts(&self, input: &StageInput<'_>) -> Result<Vec<PromptTask>, StageError> {
        let analyst = input.artifact(StageId::Analyst)?;
        let top: Vec<JsonValue> = input.scores.top(input.top_n).iter().map(score_row).collect();
        let payload = json!({
            "top_areas": top,
            "assessments": analyst.output["cities"],
        });

        Ok(vec![build_task(
            self.id(),
            ADVISOR_TASK_KEY,
            &format!("Scope: top {} areas", input.top_n),
            &payload,
        )])
    }

    fn check(
        &self,
        _key: &str,
        output: &JsonValue,
        input: &StageInput<'_>,
    ) -> Result<(), SchemaValidationError> {
        let mut seen = HashSet::new();
        for rec in output["recommendations"].as_array().into_iter().flatten() {
            let id = rec["area_id"].as_str().unwrap_or_default();
            if input.snapshot.area(id).is_none() {
                return Err(SchemaValidationError::Semantic(format!(
                    "recommendation for unknown area '{}'",
                    id
                )));
            }
            if !seen.insert(id) {
                return Err(SchemaValidationError::Semantic(format!(
                    "area '{}' recommended twice",
                    id
                )));
            }
        }
        Ok(())
    }

    fn assemble(&self, outputs: Vec<(String, JsonValue)>) -> JsonValue {
        outputs
            .into_iter()
            .next()
            .map(|(_, output)| output)
            .unwrap_or(JsonValue::Null)
    }
}
