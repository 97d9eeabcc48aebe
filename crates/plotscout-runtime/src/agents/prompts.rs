//! Prompt templates for the pipeline stages.
//!
//! Each prompt is two messages: a fixed system prompt per stage (cacheable
//! provider-side) and a user message carrying a `Stage:` header, the scope
//! and the data as pretty-printed JSON. The header lines are stable so
//! scripted adapters can match on them.

use serde_json::Value as JsonValue;

use super::parsing::SchemaValidationError;
use super::traits::{PromptTask, StageId};
use crate::providers::ChatMessage;
use plotscout_core::hashing::hash_json;

/// Shared preamble for every stage.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a real-estate market analyst working from a fixed data snapshot.

## Ground Rules
1. Use ONLY the data you are given; do not invent prices, projects or areas
2. Refer to areas by the exact `area_id` values in the data
3. Say so in the output when the data is thin rather than guessing
4. Reply with a single JSON object and nothing else
"#;

pub const COLLECTOR_PROMPT: &str = r#"
## Task: City Summary

Summarize the listings, price history and infrastructure pipeline of one city.

## Output Format (JSON)
{
  "summary": "2-4 sentences on the city's market",
  "notable_localities": ["locality names worth attention"],
  "data_gaps": ["missing or thin data the reader should know about"]
}
"#;

pub const ANALYST_PROMPT: &str = r#"
## Task: Market Assessment

Assess one city's sub-markets using the collector summary and the computed scores.
Explain each area's trend; do not re-rank areas.

## Output Format (JSON)
{
  "market_outlook": "city-level outlook",
  "areas": [
    {
      "area_id": "id from the data",
      "trend": "accelerating" | "steady" | "cooling" | "declining",
      "drivers": ["short phrases naming what drives the trend"]
    }
  ]
}
"#;

pub const ADVISOR_PROMPT: &str = r#"
## Task: Investment Recommendations

Recommend a strategy for each of the top-ranked areas, using the analyst assessments.

## Output Format (JSON)
{
  "recommendations": [
    {
      "area_id": "id from the data",
      "strategy": "strong_buy" | "buy" | "hold" | "avoid",
      "rationale": "one or two sentences"
    }
  ],
  "summary": "portfolio-level advice"
}
"#;

fn system_prompt(stage: StageId) -> String {
    let task = match stage {
        StageId::Collector => COLLECTOR_PROMPT,
        StageId::Analyst => ANALYST_PROMPT,
        StageId::Advisor => ADVISOR_PROMPT,
    };
    format!("{}{}", BASE_SYSTEM_PROMPT, task)
}

/// Build a prompt task whose data section is `payload`.
///
/// `scope` is the header line after `Stage:`, e.g. `City: Pune`.
pub fn build_task(stage: StageId, key: &str, scope: &str, payload: &JsonValue) -> PromptTask {
    let data = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    let user = format!(
        "Stage: {}\n{}\n\nData:\n```json\n{}\n```",
        stage, scope, data
    );

    PromptTask {
        key: key.to_string(),
        messages: vec![ChatMessage::system(system_prompt(stage)), ChatMessage::user(user)],
        input_hash: hash_json(payload),
    }
}

/// Follow-up message asking the model to fix an invalid reply.
pub fn correction(error: &SchemaValidationError) -> String {
    format!(
        "Your previous reply could not be used: {}\n\
         Reply again with a single JSON object that follows the output format exactly.",
        error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_layout() {
        let payload = json!({"city": "Pune", "areas": []});
        let task = build_task(StageId::Collector, "Pune", "City: Pune", &payload);

        assert_eq!(task.key, "Pune");
        assert_eq!(task.messages.len(), 2);
        assert_eq!(task.messages[0].role, "system");
        assert!(task.messages[0].content.contains("City Summary"));
        assert!(task.messages[1].content.starts_with("Stage: collector\nCity: Pune\n"));
        assert!(task.messages[1].content.contains("\"city\": \"Pune\""));
        assert_eq!(task.input_hash, hash_json(&payload));
    }

    #[test]
    fn test_correction_names_error() {
        let text = correction(&SchemaValidationError::Semantic("unknown area 'x'".into()));
        assert!(text.contains("unknown area 'x'"));
    }
}
