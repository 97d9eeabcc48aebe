//! Analyst stage: per-city outlook and per-area trend.

use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;

use super::parsing::SchemaValidationError;
use super::prompts::build_task;
use super::traits::{AgentStage, PromptTask, StageError, StageId, StageInput};
use plotscout_core::RankedArea;

#[derive(Debug, Clone)]
pub struct AnalystStage {
    capability: String,
}

impl AnalystStage {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

/// Score row as shown to the model.
pub(super) fn score_row(row: &RankedArea) -> JsonValue {
    let score = &row.score;
    json!({
        "area_id": row.area_id,
        "city": row.city,
        "locality": row.locality,
        "rank": row.rank,
        "composite": score.composite,
        "confidence": score.confidence,
        "growth_rate": score.components.growth_rate,
        "growth_tier": score.growth_tier,
        "infrastructure": score.components.infrastructure_normalized,
        "roi_percentile": score.components.roi_percentile,
        "roi_5y_percent": score.projection.roi_5y_percent,
        "risk_score": score.risk_score,
    })
}

impl AgentStage for AnalystStage {
    fn id(&self) -> StageId {
        StageId::Analyst
    }

    fn capability(&self) -> &str {
        &self.capability
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Collector]
    }

    fn prompts(&self, input: &StageInput<'_>) -> Result<Vec<PromptTask>, StageError> {
        let collector = input.artifact(StageId::Collector)?;

        Ok(input
            .snapshot
            .cities()
            .into_iter()
            .map(|city| {
                let rows: Vec<JsonValue> = input.scores.for_city(city).map(score_row).collect();
                let payload = json!({
                    "city": city,
                    "collector": collector.output["cities"][city],
                    "scores": rows,
                });
                build_task(self.id(), city, &format!("City: {}", city), &payload)
            })
            .collect())
    }

    fn check(
        &self,
        key: &str,
        output: &JsonValue,
        input: &StageInput<'_>,
    ) -> Result<(), SchemaValidationError> {
        let city_areas: HashSet<&str> = input.snapshot.areas_in(key).map(|a| a.id.as_str()).collect();
        let mut seen = HashSet::new();

        for area in output["areas"].as_array().into_iter().flatten() {
            let id = area["area_id"].as_str().unwrap_or_default();
            if !city_areas.contains(id) {
                return Err(SchemaValidationError::Semantic(format!(
                    "area '{}' is not in {}",
                    id, key
                )));
            }
            if !seen.insert(id) {
                return Err(SchemaValidationError::Semantic(format!(
                    "area '{}' assessed twice",
                    id
                )));
            }
        }
        Ok(())
    }
}
