//! Snapshot parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_snapshot_schema;
use crate::hashing::hash_json;
use crate::types::Area;

/// Errors that can occur when loading a snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read snapshot file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Snapshot does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Snapshot validation failed: {0}")]
    ValidationError(String),

    #[error("Duplicate area id: {0}")]
    DuplicateArea(String),

    #[error("Unknown area id: {0}")]
    UnknownArea(String),
}

/// Read-only ingestion snapshot: every area with its full price history
/// and infrastructure list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    areas: Vec<Area>,
}

impl MarketSnapshot {
    /// Parse a snapshot from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a snapshot from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a snapshot file, picking the format from the extension
    /// (`.json` is JSON, anything else is read as YAML).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, SnapshotError> {
        validate_snapshot_schema(&value).map_err(SnapshotError::SchemaViolation)?;
        let snapshot: MarketSnapshot = serde_json::from_value(value)?;
        Self::from_areas(snapshot.areas)
    }

    /// Build a snapshot from already-ingested areas.
    ///
    /// Nested records with an empty `area_id` are attached to their
    /// enclosing area; a record naming a different area is rejected.
    pub(crate) fn from_areas(mut areas: Vec<Area>) -> Result<Self, SnapshotError> {
        for area in &mut areas {
            for point in &mut area.price_points {
                if point.area_id.is_empty() {
                    point.area_id = area.id.clone();
                }
            }
            for project in &mut area.projects {
                if project.area_id.is_empty() {
                    project.area_id = area.id.clone();
                }
            }
            area.score = None;
        }

        let snapshot = Self { areas };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Semantic checks the schema cannot express.
    fn validate(&self) -> Result<(), SnapshotError> {
        let mut seen = HashSet::new();

        for area in &self.areas {
            if !seen.insert(area.id.as_str()) {
                return Err(SnapshotError::DuplicateArea(area.id.clone()));
            }
            if area.city.trim().is_empty() {
                return Err(SnapshotError::ValidationError(format!(
                    "area {} has an empty city",
                    area.id
                )));
            }

            for point in &area.price_points {
                if point.area_id != area.id {
                    return Err(SnapshotError::ValidationError(format!(
                        "price point for {} nested under area {}",
                        point.area_id, area.id
                    )));
                }
                if !point.price_per_sqft.is_finite() || point.price_per_sqft <= 0.0 {
                    return Err(SnapshotError::ValidationError(format!(
                        "area {} has a non-positive price on {}",
                        area.id, point.observed_on
                    )));
                }
            }

            for project in &area.projects {
                if project.area_id != area.id {
                    return Err(SnapshotError::ValidationError(format!(
                        "project {} for {} nested under area {}",
                        project.name, project.area_id, area.id
                    )));
                }
                if !project.distance_km.is_finite() || project.distance_km < 0.0 {
                    return Err(SnapshotError::ValidationError(format!(
                        "project {} in area {} has an invalid distance",
                        project.name, area.id
                    )));
                }
                if !project.impact_weight.is_finite() || project.impact_weight < 0.0 {
                    return Err(SnapshotError::ValidationError(format!(
                        "project {} in area {} has an invalid impact weight",
                        project.name, area.id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn area(&self, id: &str) -> Option<&Area> {
        self.areas.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Distinct cities in lexical order.
    pub fn cities(&self) -> Vec<&str> {
        let mut cities: Vec<&str> = self.areas.iter().map(|a| a.city.as_str()).collect();
        cities.sort_unstable();
        cities.dedup();
        cities
    }

    /// Areas of one city, in input order.
    pub fn areas_in<'a>(&'a self, city: &'a str) -> impl Iterator<Item = &'a Area> + 'a {
        self.areas.iter().filter(move |a| a.city == city)
    }

    /// Stable content hash, independent of area order in the input.
    ///
    /// Two snapshots with the same fingerprint describe the same market
    /// state, which is what a resumed run checks before reusing artifacts.
    pub fn fingerprint(&self) -> String {
        let mut areas: Vec<&Area> = self.areas.iter().collect();
        areas.sort_by(|a, b| a.id.cmp(&b.id));
        let value = serde_json::json!({
            "areas": areas
                .iter()
                .map(|a| {
                    let mut points: Vec<_> = a.price_points.iter().collect();
                    points.sort_by(|x, y| {
                        x.observed_on
                            .cmp(&y.observed_on)
                            .then_with(|| x.source.cmp(&y.source))
                    });
                    serde_json::json!({
                        "id": a.id,
                        "city": a.city,
                        "locality": a.locality,
                        "price_points": points,
                        "projects": a.projects,
                    })
                })
                .collect::<Vec<_>>()
        });
        hash_json(&value)
    }
}
