//! Parsing and validation of stage replies.
//!
//! Model replies are parsed strictly: the JSON must be the whole reply, a
//! fenced ```json block, or the outermost `{...}` span. The parsed value is
//! then checked against the stage's embedded JSON Schema.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;
use thiserror::Error;

use super::traits::StageId;

const COLLECTOR_SCHEMA_JSON: &str = include_str!("../../schema/collector.schema.json");
const ANALYST_SCHEMA_JSON: &str = include_str!("../../schema/analyst.schema.json");
const ADVISOR_SCHEMA_JSON: &str = include_str!("../../schema/advisor.schema.json");

/// A reply that could not be turned into a valid stage output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaValidationError {
    #[error("Reply is not JSON: {0}")]
    NotJson(String),

    #[error("Reply does not match the output schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("{0}")]
    Semantic(String),
}

struct StageSchemas {
    collector: jsonschema::Validator,
    analyst: jsonschema::Validator,
    advisor: jsonschema::Validator,
}

static SCHEMAS: OnceLock<Result<StageSchemas, String>> = OnceLock::new();

fn compile(name: &str, source: &str) -> Result<jsonschema::Validator, String> {
    let value: JsonValue = serde_json::from_str(source)
        .map_err(|e| format!("Invalid {} schema JSON: {}", name, e))?;
    jsonschema::options()
        .build(&value)
        .map_err(|e| format!("Failed to compile {} schema: {}", name, e))
}

fn schemas() -> Result<&'static StageSchemas, String> {
    SCHEMAS
        .get_or_init(|| {
            Ok(StageSchemas {
                collector: compile("collector", COLLECTOR_SCHEMA_JSON)?,
                analyst: compile("analyst", ANALYST_SCHEMA_JSON)?,
                advisor: compile("advisor", ADVISOR_SCHEMA_JSON)?,
            })
        })
        .as_ref()
        .map_err(Clone::clone)
}

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Pull a JSON object out of a model reply.
pub fn extract_json(text: &str) -> Result<JsonValue, SchemaValidationError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return Ok(value);
    }

    if let Some(captures) = fence().and_then(|re| re.captures(trimmed)) {
        if let Some(body) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<JsonValue>(body.as_str().trim()) {
                return Ok(value);
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&trimmed[start..=end])
                .map_err(|e| SchemaValidationError::NotJson(e.to_string()))
        }
        _ => Err(SchemaValidationError::NotJson(
            "no JSON object found in reply".to_string(),
        )),
    }
}

/// Check a parsed output against the stage's schema.
pub fn validate_output(stage: StageId, output: &JsonValue) -> Result<(), SchemaValidationError> {
    let schemas = schemas().map_err(|e| SchemaValidationError::Schema(vec![e]))?;
    let validator = match stage {
        StageId::Collector => &schemas.collector,
        StageId::Analyst => &schemas.analyst,
        StageId::Advisor => &schemas.advisor,
    };

    let errors: Vec<String> = validator
        .iter_errors(output)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError::Schema(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schemas_compile() {
        assert!(schemas().is_ok());
    }

    #[test]
    fn test_extract_plain_json() {
        let value = extract_json("  {\"a\": 1}\n").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extract_fenced_json() {
        let reply = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nAnything else?";
        assert_eq!(extract_json(reply).unwrap(), json!({"summary": "ok"}));
    }

    #[test]
    fn test_extract_embedded_object() {
        let reply = "Sure! {\"summary\": \"ok\", \"n\": [1, 2]} Hope that helps.";
        assert_eq!(extract_json(reply).unwrap(), json!({"summary": "ok", "n": [1, 2]}));
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(matches!(
            extract_json("I cannot help with that."),
            Err(SchemaValidationError::NotJson(_))
        ));
        assert!(matches!(
            extract_json("{ not json }"),
            Err(SchemaValidationError::NotJson(_))
        ));
    }

    #[test]
    fn test_collector_schema() {
        let ok = json!({"summary": "s", "notable_localities": ["Baner"], "data_gaps": []});
        assert!(validate_output(StageId::Collector, &ok).is_ok());

        let missing = json!({"summary": "s"});
        match validate_output(StageId::Collector, &missing) {
            Err(SchemaValidationError::Schema(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected schema errors, got {other:?}"),
        }
    }

    #[test]
    fn test_advisor_strategy_enum() {
        let bad = json!({
            "summary": "s",
            "recommendations": [{"area_id": "a", "strategy": "yolo", "rationale": "r"}]
        });
        assert!(validate_output(StageId::Advisor, &bad).is_err());
    }

    #[test]
    fn test_analyst_trend_enum() {
        let ok = json!({
            "market_outlook": "positive",
            "areas": [{"area_id": "a", "trend": "steady", "drivers": ["metro"]}]
        });
        assert!(validate_output(StageId::Analyst, &ok).is_ok());
    }
}
