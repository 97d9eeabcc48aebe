//! GeoScorer: composite ROI score per area.
//!
//! The composite is a weighted sum of three normalized components:
//!
//! - trailing price growth, min-max normalized across the snapshot
//! - infrastructure-proximity impact, normalized by the snapshot maximum
//! - historical ROI percentile within the area's city
//!
//! Areas with thin price history are scored and flagged `low_data`, never
//! dropped. Ranking is total: score descending, full confidence before low
//! data, then area id.

mod cohort;
mod growth;
mod infrastructure;
mod projection;

pub use cohort::cohort_percentiles;
pub use growth::{historical_roi, min_max_normalize, trailing_growth};
pub use infrastructure::{horizon_decay, infrastructure_impact, project_impact};
pub use projection::{project_roi, risk_score};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::snapshot::MarketSnapshot;
use crate::types::{
    Area, AreaScore, Confidence, GrowthTier, ProjectCategory, RankedArea, ScoreComponents,
};

/// Tolerance when checking that weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Errors raised by scorer configuration.
#[derive(Debug, Error)]
pub enum ScoringConfigError {
    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid scoring config: {0}")]
    InvalidConfig(String),

    #[error("Failed to build scoring pool: {0}")]
    ThreadPool(String),
}

/// Relative weight of each score component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoreWeights {
    pub growth: f64,
    pub infrastructure: f64,
    pub roi_percentile: f64,
}

impl ScoreWeights {
    pub fn new(growth: f64, infrastructure: f64, roi_percentile: f64) -> Self {
        Self {
            growth,
            infrastructure,
            roi_percentile,
        }
    }

    /// Equal weight on every component.
    pub fn equal() -> Self {
        let third = 1.0 / 3.0;
        Self::new(third, third, third)
    }

    pub fn sum(&self) -> f64 {
        self.growth + self.infrastructure + self.roi_percentile
    }

    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        for (name, value) in [
            ("growth", self.growth),
            ("infrastructure", self.infrastructure),
            ("roi_percentile", self.roi_percentile),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ScoringConfigError::InvalidWeights(format!(
                    "{name} weight must be a non-negative number, got {value}"
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ScoringConfigError::InvalidWeights(format!(
                "weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::equal()
    }
}

/// Multiplier per project category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CategoryMultipliers {
    pub transit: f64,
    pub commercial: f64,
    pub civic: f64,
}

impl CategoryMultipliers {
    pub fn for_category(&self, category: ProjectCategory) -> f64 {
        match category {
            ProjectCategory::Transit => self.transit,
            ProjectCategory::Commercial => self.commercial,
            ProjectCategory::Civic => self.civic,
        }
    }
}

impl Default for CategoryMultipliers {
    fn default() -> Self {
        Self {
            transit: 1.5,
            commercial: 1.2,
            civic: 1.0,
        }
    }
}

/// Multiplier per delivery status. Projects without a status use 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusMultipliers {
    pub announced: f64,
    pub in_progress: f64,
    pub completed: f64,
}

impl Default for StatusMultipliers {
    fn default() -> Self {
        Self {
            announced: 0.5,
            in_progress: 1.0,
            completed: 1.5,
        }
    }
}

/// GeoScorer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,

    /// Trailing window for growth, in months
    pub growth_window_months: u32,

    /// Projects completing this many months out or later contribute nothing
    pub decay_horizon_months: u32,

    /// Distance at which a project's impact halves, in kilometres
    pub distance_scale_km: f64,

    /// Areas with fewer price points are flagged `low_data`
    pub min_price_points: usize,

    pub category_multipliers: CategoryMultipliers,

    pub status_multipliers: StatusMultipliers,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            growth_window_months: 60,
            decay_horizon_months: 60,
            distance_scale_km: 1.0,
            min_price_points: 4,
            category_multipliers: CategoryMultipliers::default(),
            status_multipliers: StatusMultipliers::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        self.weights.validate()?;

        if self.growth_window_months == 0 {
            return Err(ScoringConfigError::InvalidConfig(
                "growth_window_months must be positive".to_string(),
            ));
        }
        if self.decay_horizon_months == 0 {
            return Err(ScoringConfigError::InvalidConfig(
                "decay_horizon_months must be positive".to_string(),
            ));
        }
        if !self.distance_scale_km.is_finite() || self.distance_scale_km <= 0.0 {
            return Err(ScoringConfigError::InvalidConfig(
                "distance_scale_km must be positive".to_string(),
            ));
        }

        let m = &self.category_multipliers;
        let s = &self.status_multipliers;
        let multipliers = [
            m.transit,
            m.commercial,
            m.civic,
            s.announced,
            s.in_progress,
            s.completed,
        ];
        if multipliers.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ScoringConfigError::InvalidConfig(
                "multipliers must be non-negative numbers".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-area raw features, computed independently of other areas.
#[derive(Debug, Clone)]
struct RawFeatures {
    growth_rate: f64,
    infrastructure_impact: f64,
    historical_roi: f64,
    price_point_count: usize,
    latest_price: Option<f64>,
}

/// Ranked scores for one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScoreTable {
    rows: Vec<RankedArea>,
}

impl ScoreTable {
    /// Rows in rank order.
    pub fn ranked(&self) -> &[RankedArea] {
        &self.rows
    }

    pub fn get(&self, area_id: &str) -> Option<&RankedArea> {
        self.rows.iter().find(|r| r.area_id == area_id)
    }

    /// The first `n` rows.
    pub fn top(&self, n: usize) -> &[RankedArea] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Rows for one city, still in global rank order.
    pub fn for_city<'a>(&'a self, city: &'a str) -> impl Iterator<Item = &'a RankedArea> + 'a {
        self.rows.iter().filter(move |r| r.city == city)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copies of the snapshot's areas with their scores attached.
    pub fn scored_areas(&self, snapshot: &MarketSnapshot) -> Vec<Area> {
        snapshot
            .areas()
            .iter()
            .map(|area| {
                let mut area = area.clone();
                area.score = self.get(&area.id).map(|r| r.score.clone());
                area
            })
            .collect()
    }
}

/// Computes composite scores and the ranking for a snapshot.
#[derive(Debug)]
pub struct GeoScorer {
    config: ScoringConfig,
    pool: rayon::ThreadPool,
}

impl GeoScorer {
    /// Build a scorer that uses at most `pool_size` threads.
    pub fn new(config: ScoringConfig, pool_size: usize) -> Result<Self, ScoringConfigError> {
        config.validate()?;
        if pool_size == 0 {
            return Err(ScoringConfigError::InvalidConfig(
                "pool_size must be positive".to_string(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("geoscorer-{i}"))
            .build()
            .map_err(|e| ScoringConfigError::ThreadPool(e.to_string()))?;

        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every area of the snapshot and rank them.
    pub fn score(&self, snapshot: &MarketSnapshot) -> ScoreTable {
        let areas = snapshot.areas();

        // Order-preserving parallel map, so results line up with `areas`.
        let raw: Vec<RawFeatures> = self
            .pool
            .install(|| areas.par_iter().map(|a| self.raw_features(a)).collect());

        let growth_normalized =
            min_max_normalize(&raw.iter().map(|r| r.growth_rate).collect::<Vec<_>>());
        let infra_normalized = infrastructure::normalize_by_max(
            &raw.iter().map(|r| r.infrastructure_impact).collect::<Vec<_>>(),
        );
        let cohort_input: Vec<(&str, f64)> = areas
            .iter()
            .zip(&raw)
            .map(|(a, r)| (a.city.as_str(), r.historical_roi))
            .collect();
        let roi_percentiles = cohort_percentiles(&cohort_input);

        let weights = self.config.weights;
        let mut rows: Vec<RankedArea> = areas
            .iter()
            .enumerate()
            .map(|(i, area)| {
                let r = &raw[i];
                let components = ScoreComponents {
                    growth_rate: r.growth_rate,
                    growth_normalized: growth_normalized[i],
                    infrastructure_impact: r.infrastructure_impact,
                    infrastructure_normalized: infra_normalized[i],
                    historical_roi: r.historical_roi,
                    roi_percentile: roi_percentiles[i],
                };
                let weighted = weights.growth * components.growth_normalized
                    + weights.infrastructure * components.infrastructure_normalized
                    + weights.roi_percentile * components.roi_percentile;
                let composite = if weighted.is_finite() {
                    weighted.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let confidence = if r.price_point_count < self.config.min_price_points {
                    Confidence::LowData
                } else {
                    Confidence::Full
                };

                RankedArea {
                    rank: 0,
                    area_id: area.id.clone(),
                    city: area.city.clone(),
                    locality: area.locality.clone(),
                    score: AreaScore {
                        composite,
                        confidence,
                        price_point_count: r.price_point_count,
                        growth_tier: GrowthTier::from_rate(r.growth_rate),
                        projection: project_roi(
                            r.growth_rate,
                            components.infrastructure_normalized,
                        ),
                        risk_score: risk_score(r.latest_price, r.growth_rate),
                        components,
                    },
                }
            })
            .collect();

        rows.sort_by(compare_rows);
        for (i, row) in rows.iter_mut().enumerate() {
            row.rank = i + 1;
        }

        tracing::debug!(
            areas = rows.len(),
            low_data = rows.iter().filter(|r| r.score.confidence.is_low_data()).count(),
            "Scored snapshot"
        );

        ScoreTable { rows }
    }

    fn raw_features(&self, area: &Area) -> RawFeatures {
        let points = area.sorted_prices();
        RawFeatures {
            growth_rate: trailing_growth(&points, self.config.growth_window_months).unwrap_or(0.0),
            infrastructure_impact: infrastructure_impact(&area.projects, &self.config),
            historical_roi: historical_roi(&points).unwrap_or(0.0),
            price_point_count: points.len(),
            latest_price: area.latest_price(),
        }
    }
}

/// Score descending, full confidence before low data, then area id.
fn compare_rows(a: &RankedArea, b: &RankedArea) -> Ordering {
    b.score
        .composite
        .total_cmp(&a.score.composite)
        .then_with(|| {
            a.score
                .confidence
                .is_low_data()
                .cmp(&b.score.confidence.is_low_data())
        })
        .then_with(|| a.area_id.cmp(&b.area_id))
}
