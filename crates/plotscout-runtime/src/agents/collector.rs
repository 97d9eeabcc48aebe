//! Collector stage: one summary per city.

use serde_json::{json, Value as JsonValue};

use super::prompts::build_task;
use super::traits::{AgentStage, PromptTask, StageError, StageId, StageInput};
use plotscout_core::Area;

#[derive(Debug, Clone)]
pub struct CollectorStage {
    capability: String,
}

impl CollectorStage {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

fn area_payload(area: &Area) -> JsonValue {
    let prices: Vec<JsonValue> = area
        .sorted_prices()
        .into_iter()
        .map(|p| json!({ "observed_on": p.observed_on, "price_per_sqft": p.price_per_sqft }))
        .collect();
    let projects: Vec<JsonValue> = area
        .projects
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "category": p.category,
                "status": p.status,
                "distance_km": p.distance_km,
                "completion_horizon_months": p.completion_horizon_months,
            })
        })
        .collect();

    json!({
        "area_id": area.id,
        "locality": area.locality,
        "price_points": prices,
        "infrastructure": projects,
    })
}

impl AgentStage for CollectorStage {
    fn id(&self) -> StageId {
        StageId::Collector
    }

    fn capability(&self) -> &str {
        &self.capability
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[]
    }

    fn prompts(&self, input: &StageInput<'_>) -> Result<Vec<PromptTask>, StageError> {
        Ok(input
            .snapshot
            .cities()
            .into_iter()
            .map(|city| {
                let areas: Vec<JsonValue> = input.snapshot.areas_in(city).map(area_payload).collect();
                let payload = json!({ "city": city, "areas": areas });
                build_task(self.id(), city, &format!("City: {}", city), &payload)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotscout_core::{score_snapshot, MarketSnapshot, ScoringConfig};
    use std::collections::BTreeMap;

    const SNAPSHOT: &str = r#"
areas:
  - id: pune-baner
    city: Pune
    locality: Baner
    price_points:
      - { observed_on: "2023-01-01", price_per_sqft: 9000 }
      - { observed_on: "2022-01-01", price_per_sqft: 8000 }
    projects:
      - { name: Metro Line 3, category: transit, distance_km: 0.5, completion_horizon_months: 12, impact_weight: 1.0 }
  - id: mumbai-powai
    city: Mumbai
    locality: Powai
"#;

    #[test]
    fn test_one_prompt_per_city() {
        let snapshot = MarketSnapshot::from_yaml(SNAPSHOT).unwrap();
        let scores = score_snapshot(&snapshot, &ScoringConfig::default(), 1).unwrap();
        let artifacts = BTreeMap::new();
        let input = StageInput {
            snapshot: &snapshot,
            scores: &scores,
            artifacts: &artifacts,
            top_n: 10,
        };

        let tasks = CollectorStage::new("summarization").prompts(&input).unwrap();
        let keys: Vec<&str> = tasks.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["Mumbai", "Pune"]);

        let pune = &tasks[1].messages[1].content;
        assert!(pune.starts_with("Stage: collector\nCity: Pune"));
        assert!(pune.contains("Metro Line 3"));
        // Prices are listed oldest first
        let first = pune.find("2022-01-01").unwrap();
        let second = pune.find("2023-01-01").unwrap();
        assert!(first < second);
    }
}
