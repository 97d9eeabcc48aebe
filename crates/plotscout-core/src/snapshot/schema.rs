//! JSON Schema validation for market snapshots.
//!
//! Every snapshot is checked against `schema/snapshot.schema.json` before
//! it is deserialized, so structural problems are reported with a path into
//! the input document rather than as an opaque serde error.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded snapshot schema (loaded at compile time).
const SNAPSHOT_SCHEMA_JSON: &str = include_str!("../../schema/snapshot.schema.json");

/// Compiled validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(SNAPSHOT_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a snapshot document against the schema.
///
/// Returns every violation found, formatted as `"<message> at <path>"`.
pub fn validate_snapshot_schema(snapshot_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(snapshot_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_compiles() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_minimal_snapshot_valid() {
        let doc = json!({
            "areas": [{ "id": "a1", "city": "Pune", "locality": "Baner" }]
        });
        assert!(validate_snapshot_schema(&doc).is_ok());
    }

    #[test]
    fn test_negative_price_rejected() {
        let doc = json!({
            "areas": [{
                "id": "a1", "city": "Pune", "locality": "Baner",
                "price_points": [{ "observed_on": "2024-01-01", "price_per_sqft": -5 }]
            }]
        });
        let errors = validate_snapshot_schema(&doc).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/areas/0/price_points/0/price_per_sqft"));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let doc = json!({
            "areas": [{
                "id": "a1", "city": "Pune", "locality": "Baner",
                "projects": [{ "category": "stadium", "distance_km": 1, "completion_horizon_months": 3 }]
            }]
        });
        assert!(validate_snapshot_schema(&doc).is_err());
    }
}
