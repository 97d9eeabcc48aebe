//! Shared data model for market snapshots and scores.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single observed price for an area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    /// Owning area. Filled from the enclosing area when omitted in the input.
    #[serde(default)]
    pub area_id: String,

    /// Observation date
    pub observed_on: NaiveDate,

    /// Price per square foot
    pub price_per_sqft: f64,

    /// Where the observation came from (listing portal, registry, ...)
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "unknown".to_string()
}

/// Category of an infrastructure project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProjectCategory {
    Transit,
    Commercial,
    Civic,
}

impl fmt::Display for ProjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectCategory::Transit => write!(f, "transit"),
            ProjectCategory::Commercial => write!(f, "commercial"),
            ProjectCategory::Civic => write!(f, "civic"),
        }
    }
}

/// Delivery status of an infrastructure project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Announced,
    InProgress,
    Completed,
}

/// An infrastructure project near an area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfrastructureProject {
    /// Owning area. Filled from the enclosing area when omitted in the input.
    #[serde(default)]
    pub area_id: String,

    /// Project name, e.g. "Metro Line 3"
    #[serde(default)]
    pub name: String,

    pub category: ProjectCategory,

    #[serde(default)]
    pub status: Option<ProjectStatus>,

    /// Distance from the area centroid in kilometres
    pub distance_km: f64,

    /// Months until expected completion (0 = already complete)
    pub completion_horizon_months: u32,

    /// Relative impact of the project (1.0 = typical)
    #[serde(default = "default_impact_weight")]
    pub impact_weight: f64,
}

fn default_impact_weight() -> f64 {
    1.0
}

/// A geographic sub-market.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Area {
    /// Unique identifier across the snapshot
    pub id: String,

    pub city: String,

    /// Locality name, e.g. "Whitefield"
    pub locality: String,

    #[serde(default)]
    pub price_points: Vec<PricePoint>,

    #[serde(default)]
    pub projects: Vec<InfrastructureProject>,

    /// Set by the scorer; never read from input.
    #[serde(default, skip_deserializing)]
    pub score: Option<AreaScore>,
}

impl Area {
    /// Price points ordered by observation date.
    pub fn sorted_prices(&self) -> Vec<&PricePoint> {
        let mut points: Vec<&PricePoint> = self.price_points.iter().collect();
        points.sort_by_key(|p| p.observed_on);
        points
    }

    /// Most recent price per square foot, if any.
    pub fn latest_price(&self) -> Option<f64> {
        self.price_points
            .iter()
            .max_by_key(|p| p.observed_on)
            .map(|p| p.price_per_sqft)
    }
}

/// How much the score can be trusted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Enough price history for every component
    Full,

    /// Fewer price points than the configured minimum
    LowData,
}

impl Confidence {
    pub fn is_low_data(&self) -> bool {
        matches!(self, Confidence::LowData)
    }
}

/// Annual growth bucket used in reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrowthTier {
    High,
    Moderate,
    Stable,
    Low,
}

impl GrowthTier {
    /// Bucket an annualized growth rate (0.08 = 8%).
    pub fn from_rate(rate: f64) -> Self {
        if rate > 0.08 {
            GrowthTier::High
        } else if rate >= 0.05 {
            GrowthTier::Moderate
        } else if rate >= 0.03 {
            GrowthTier::Stable
        } else {
            GrowthTier::Low
        }
    }
}

/// Raw and normalized inputs behind a composite score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreComponents {
    /// Annualized trailing growth rate
    pub growth_rate: f64,

    /// Growth normalized across the snapshot, `[0, 1]`
    pub growth_normalized: f64,

    /// Summed infrastructure impact before normalization
    pub infrastructure_impact: f64,

    /// Infrastructure impact normalized across the snapshot, `[0, 1]`
    pub infrastructure_normalized: f64,

    /// Total appreciation over the full price history
    pub historical_roi: f64,

    /// Percentile of `historical_roi` within the city cohort, `[0, 1]`
    pub roi_percentile: f64,
}

/// Forward-looking appreciation estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoiProjection {
    pub projected_annual_growth: f64,
    pub roi_3y_percent: f64,
    pub roi_5y_percent: f64,
    pub roi_10y_percent: f64,
}

/// Score assigned to an area by the scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaScore {
    /// Weighted composite, `[0, 1]`
    pub composite: f64,

    pub components: ScoreComponents,

    pub confidence: Confidence,

    /// Number of price points the score was computed from
    pub price_point_count: usize,

    pub growth_tier: GrowthTier,

    pub projection: RoiProjection,

    /// 1 (lowest) to 10 (highest)
    pub risk_score: f64,
}

/// One row of a ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedArea {
    /// 1-based position in the ranking
    pub rank: usize,
    pub area_id: String,
    pub city: String,
    pub locality: String,
    pub score: AreaScore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_tier_boundaries() {
        assert_eq!(GrowthTier::from_rate(0.12), GrowthTier::High);
        assert_eq!(GrowthTier::from_rate(0.08), GrowthTier::Moderate);
        assert_eq!(GrowthTier::from_rate(0.05), GrowthTier::Moderate);
        assert_eq!(GrowthTier::from_rate(0.03), GrowthTier::Stable);
        assert_eq!(GrowthTier::from_rate(0.01), GrowthTier::Low);
        assert_eq!(GrowthTier::from_rate(-0.02), GrowthTier::Low);
    }

    #[test]
    fn test_score_is_not_read_from_input() {
        let json = r#"{
            "id": "blr-wf",
            "city": "Bangalore",
            "locality": "Whitefield",
            "score": {"composite": 1.0}
        }"#;
        let area: Area = serde_json::from_str(json).unwrap();
        assert!(area.score.is_none());
    }

    #[test]
    fn test_latest_price() {
        let area = Area {
            id: "a".to_string(),
            city: "Pune".to_string(),
            locality: "Baner".to_string(),
            price_points: vec![
                PricePoint {
                    area_id: "a".to_string(),
                    observed_on: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                    price_per_sqft: 120.0,
                    source: "x".to_string(),
                },
                PricePoint {
                    area_id: "a".to_string(),
                    observed_on: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                    price_per_sqft: 100.0,
                    source: "x".to_string(),
                },
            ],
            projects: vec![],
            score: None,
        };
        assert_eq!(area.latest_price(), Some(120.0));
        assert_eq!(area.sorted_prices()[0].price_per_sqft, 100.0);
    }
}
