//! Incremental ingestion of snapshot records.
//!
//! Connectors deliver areas, prices and projects as separate streams. The
//! builder collects them and only hands out a [`MarketSnapshot`] once
//! ingestion is closed, so nothing can be scored against a partial history.

use super::parser::{MarketSnapshot, SnapshotError};
use crate::types::{Area, InfrastructureProject, PricePoint};

/// Collects ingestion records into a snapshot.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    areas: Vec<Area>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an area. Price points and projects already nested in the
    /// area are kept.
    pub fn area(
        mut self,
        id: impl Into<String>,
        city: impl Into<String>,
        locality: impl Into<String>,
    ) -> Self {
        self.areas.push(Area {
            id: id.into(),
            city: city.into(),
            locality: locality.into(),
            price_points: Vec::new(),
            projects: Vec::new(),
            score: None,
        });
        self
    }

    /// Ingest a price point for a registered area.
    pub fn price_point(mut self, point: PricePoint) -> Result<Self, SnapshotError> {
        let area = self
            .find_mut(&point.area_id)
            .ok_or_else(|| SnapshotError::UnknownArea(point.area_id.clone()))?;
        area.price_points.push(point);
        Ok(self)
    }

    /// Ingest an infrastructure project for a registered area.
    pub fn project(mut self, project: InfrastructureProject) -> Result<Self, SnapshotError> {
        let area = self
            .find_mut(&project.area_id)
            .ok_or_else(|| SnapshotError::UnknownArea(project.area_id.clone()))?;
        area.projects.push(project);
        Ok(self)
    }

    /// Close ingestion and validate the result.
    pub fn build(self) -> Result<MarketSnapshot, SnapshotError> {
        MarketSnapshot::from_areas(self.areas)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Area> {
        self.areas.iter_mut().find(|a| a.id == id)
    }
}
