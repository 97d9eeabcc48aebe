//! # plotscout-core
//!
//! Deterministic market data model and ROI scoring engine.
//!
//! This crate answers, for a read-only snapshot of sub-markets:
//! - How fast are prices moving?
//! - How much does nearby infrastructure matter?
//! - Where does each area sit against its city?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same snapshot always produces the same ranking
//! 2. **No LLM calls**: Scoring is pure arithmetic over the snapshot
//! 3. **Total order**: Ties break on confidence, then area id
//! 4. **Nothing dropped**: Thin histories are flagged `low_data`, not excluded
//!
//! ## Example
//!
//! ```rust,ignore
//! use plotscout_core::{score_snapshot, MarketSnapshot, ScoringConfig};
//!
//! let snapshot = MarketSnapshot::from_file("snapshot.yaml")?;
//! let table = score_snapshot(&snapshot, &ScoringConfig::default(), 4)?;
//!
//! for row in table.ranked() {
//!     println!("{} {} {:.3}", row.rank, row.area_id, row.score.composite);
//! }
//! ```

pub mod hashing;
pub mod scoring;
pub mod snapshot;
pub mod types;

// Re-export main types at crate root
pub use scoring::{
    CategoryMultipliers, GeoScorer, ScoreTable, ScoreWeights, ScoringConfig, ScoringConfigError,
    StatusMultipliers,
};
pub use snapshot::{validate_snapshot_schema, MarketSnapshot, SnapshotBuilder, SnapshotError};
pub use types::{
    Area, AreaScore, Confidence, GrowthTier, InfrastructureProject, PricePoint, ProjectCategory,
    ProjectStatus, RankedArea, RoiProjection, ScoreComponents,
};

/// Score and rank a snapshot with a freshly built scorer.
///
/// Convenience for one-shot callers; long-lived callers should keep a
/// [`GeoScorer`] so the thread pool is reused.
pub fn score_snapshot(
    snapshot: &MarketSnapshot,
    config: &ScoringConfig,
    pool_size: usize,
) -> Result<ScoreTable, ScoringConfigError> {
    let scorer = GeoScorer::new(config.clone(), pool_size)?;
    Ok(scorer.score(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_growth_ranking() {
        let yaml = r#"
areas:
  - id: slow
    city: Pune
    locality: Hadapsar
    price_points:
      - { observed_on: "2021-01-01", price_per_sqft: 5000 }
      - { observed_on: "2022-01-01", price_per_sqft: 5100 }
      - { observed_on: "2023-01-01", price_per_sqft: 5202 }
      - { observed_on: "2024-01-01", price_per_sqft: 5306.04 }
  - id: fast
    city: Pune
    locality: Baner
    price_points:
      - { observed_on: "2021-01-01", price_per_sqft: 5000 }
      - { observed_on: "2022-01-01", price_per_sqft: 5500 }
      - { observed_on: "2023-01-01", price_per_sqft: 6050 }
      - { observed_on: "2024-01-01", price_per_sqft: 6655 }
  - id: mid
    city: Pune
    locality: Aundh
    price_points:
      - { observed_on: "2021-01-01", price_per_sqft: 5000 }
      - { observed_on: "2022-01-01", price_per_sqft: 5250 }
      - { observed_on: "2023-01-01", price_per_sqft: 5512.5 }
      - { observed_on: "2024-01-01", price_per_sqft: 5788.125 }
"#;
        let snapshot = MarketSnapshot::from_yaml(yaml).unwrap();
        let table = score_snapshot(&snapshot, &ScoringConfig::default(), 2).unwrap();

        let order: Vec<&str> = table.ranked().iter().map(|r| r.area_id.as_str()).collect();
        assert_eq!(order, vec!["fast", "mid", "slow"]);
        assert!(table.ranked().iter().all(|r| r.score.confidence == Confidence::Full));
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let snapshot = SnapshotBuilder::new().build().unwrap();
        let config = ScoringConfig {
            weights: ScoreWeights::new(0.6, 0.6, 0.0),
            ..ScoringConfig::default()
        };
        assert!(matches!(
            score_snapshot(&snapshot, &config, 1),
            Err(ScoringConfigError::InvalidWeights(_))
        ));
    }
}
