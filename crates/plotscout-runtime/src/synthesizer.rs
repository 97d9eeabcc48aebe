//! Synthesizer: folds a pipeline run into the final recommendation report.
//!
//! Deterministic and LLM-free. Rules:
//! 1. Every ranked area appears, in rank order
//! 2. Strategy and rationale come from the advisor when it recommended the
//!    area; otherwise the rationale is built from the score
//! 3. Trend and outlook come from the analyst when present

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use plotscout_core::{Confidence, GrowthTier, RankedArea};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

use crate::agents::StageId;
use crate::resilience::LlmUsage;
use crate::run::{PipelineRun, RunStatus, StageFailure};

/// Advisor strategy for an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::StrongBuy => "strong buy",
            Strategy::Buy => "buy",
            Strategy::Hold => "hold",
            Strategy::Avoid => "avoid",
        };
        f.write_str(label)
    }
}

/// Numbers behind an area's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportingMetrics {
    pub growth_rate: f64,
    pub growth_tier: GrowthTier,
    pub infrastructure: f64,
    pub roi_percentile: f64,
    pub roi_5y_percent: f64,
    pub risk_score: f64,
    pub price_points: usize,
}

/// One area of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecommendation {
    pub rank: usize,
    pub city: String,
    pub locality: String,
    pub score: f64,
    pub confidence: Confidence,

    /// Present only when the advisor recommended the area
    pub strategy: Option<Strategy>,

    pub rationale: String,

    /// Analyst trend label
    pub trend: Option<String>,

    pub metrics: SupportingMetrics,
}

/// Final artifact handed to reporting: area id to recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub snapshot_fingerprint: String,
    pub status: RunStatus,

    /// Advisor portfolio summary
    pub summary: Option<String>,

    /// City outlooks from the analyst
    pub outlooks: IndexMap<String, String>,

    /// In rank order
    pub areas: IndexMap<String, AreaRecommendation>,

    pub errors: Vec<StageFailure>,
    pub usage: LlmUsage,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AdvisorRecommendation {
    area_id: String,
    strategy: Strategy,
    rationale: String,
}

/// Builds [`RecommendationReport`]s.
#[derive(Debug, Default)]
pub struct ReportSynthesizer;

impl ReportSynthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(&self, run: &PipelineRun) -> RecommendationReport {
        let advisor = run.artifact(StageId::Advisor).map(|a| &a.output);
        let analyst = run.artifact(StageId::Analyst).map(|a| &a.output);

        let advice: HashMap<String, AdvisorRecommendation> = advisor
            .and_then(|out| out.get("recommendations").cloned())
            .and_then(|recs| serde_json::from_value::<Vec<AdvisorRecommendation>>(recs).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.area_id.clone(), r))
            .collect();

        let trends = analyst.map(trends_by_area).unwrap_or_default();
        let outlooks: IndexMap<String, String> = analyst
            .and_then(|out| out["cities"].as_object())
            .map(|cities| {
                cities
                    .iter()
                    .filter_map(|(city, v)| {
                        v["market_outlook"].as_str().map(|o| (city.clone(), o.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let areas = run
            .scores
            .ranked()
            .iter()
            .map(|row| {
                let advised = advice.get(&row.area_id);
                let rec = AreaRecommendation {
                    rank: row.rank,
                    city: row.city.clone(),
                    locality: row.locality.clone(),
                    score: row.score.composite,
                    confidence: row.score.confidence,
                    strategy: advised.map(|a| a.strategy),
                    rationale: advised
                        .map(|a| a.rationale.clone())
                        .unwrap_or_else(|| score_rationale(row)),
                    trend: trends.get(&row.area_id).cloned(),
                    metrics: metrics(row),
                };
                (row.area_id.clone(), rec)
            })
            .collect();

        RecommendationReport {
            snapshot_fingerprint: run.snapshot_fingerprint.clone(),
            status: run.status,
            summary: advisor.and_then(|out| out["summary"].as_str()).map(str::to_string),
            outlooks,
            areas,
            errors: run.errors.clone(),
            usage: run.usage.clone(),
            generated_at: Utc::now(),
        }
    }
}

fn trends_by_area(output: &JsonValue) -> HashMap<String, String> {
    output["cities"]
        .as_object()
        .into_iter()
        .flat_map(|cities| cities.values())
        .flat_map(|city| city["areas"].as_array().into_iter().flatten())
        .filter_map(|area| {
            Some((
                area["area_id"].as_str()?.to_string(),
                area["trend"].as_str()?.to_string(),
            ))
        })
        .collect()
}

fn metrics(row: &RankedArea) -> SupportingMetrics {
    let score = &row.score;
    SupportingMetrics {
        growth_rate: score.components.growth_rate,
        growth_tier: score.growth_tier,
        infrastructure: score.components.infrastructure_normalized,
        roi_percentile: score.components.roi_percentile,
        roi_5y_percent: score.projection.roi_5y_percent,
        risk_score: score.risk_score,
        price_points: score.price_point_count,
    }
}

/// Rationale used when the advisor said nothing about an area.
fn score_rationale(row: &RankedArea) -> String {
    let score = &row.score;
    let mut text = format!(
        "Ranked #{} with score {:.2}: {:.1}% annual growth, infrastructure {:.2}, \
         ROI percentile {:.2} in {}",
        row.rank,
        score.composite,
        score.components.growth_rate * 100.0,
        score.components.infrastructure_normalized,
        score.components.roi_percentile,
        row.city,
    );
    if score.confidence.is_low_data() {
        text.push_str(&format!(
            " (low data: {} price points)",
            score.price_point_count
        ));
    }
    text
}

impl fmt::Display for RecommendationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {:?}", self.status)?;
        if let Some(summary) = &self.summary {
            writeln!(f, "\n{}", summary)?;
        }
        for (city, outlook) in &self.outlooks {
            writeln!(f, "\n{}: {}", city, outlook)?;
        }
        writeln!(f)?;
        for (id, area) in &self.areas {
            let strategy = area
                .strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:>3}. {:<24} {:<12} {:.3}  {:<10} {}",
                area.rank, id, area.city, area.score, strategy, area.rationale
            )?;
        }
        for error in &self.errors {
            writeln!(f, "\n! {}: {}", error.stage, error.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{StageArtifact, StageStatus};
    use plotscout_core::{score_snapshot, MarketSnapshot, ScoringConfig};
    use serde_json::json;

    fn run_with_scores() -> PipelineRun {
        let snapshot = MarketSnapshot::from_yaml(
            r#"
areas:
  - id: fast
    city: Pune
    locality: Baner
    price_points:
      - { observed_on: "2021-01-01", price_per_sqft: 5000 }
      - { observed_on: "2023-01-01", price_per_sqft: 6050 }
  - id: slow
    city: Pune
    locality: Hadapsar
    price_points:
      - { observed_on: "2021-01-01", price_per_sqft: 5000 }
      - { observed_on: "2023-01-01", price_per_sqft: 5100 }
"#,
        )
        .unwrap();
        let mut run = PipelineRun::new(snapshot.fingerprint());
        run.scores = score_snapshot(&snapshot, &ScoringConfig::default(), 1).unwrap();
        run
    }

    fn artifact(stage: StageId, output: JsonValue) -> StageArtifact {
        StageArtifact {
            stage,
            capability: "reasoning".into(),
            inputs: vec![],
            output,
            records: vec![],
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_without_llm_output() {
        let mut run = run_with_scores();
        run.settle();
        let report = ReportSynthesizer::new().synthesize(&run);

        let ids: Vec<&str> = report.areas.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["fast", "slow"]);
        let fast = &report.areas["fast"];
        assert_eq!(fast.strategy, None);
        assert!(fast.rationale.starts_with("Ranked #1"));
        assert!(fast.rationale.contains("low data"));
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_report_merges_stage_outputs() {
        let mut run = run_with_scores();
        run.artifacts.insert(
            StageId::Analyst,
            artifact(
                StageId::Analyst,
                json!({"cities": {"Pune": {"market_outlook": "Rising", "areas": [
                    {"area_id": "fast", "trend": "accelerating", "drivers": []}
                ]}}}),
            ),
        );
        run.artifacts.insert(
            StageId::Advisor,
            artifact(
                StageId::Advisor,
                json!({"summary": "Buy Baner", "recommendations": [
                    {"area_id": "fast", "strategy": "strong_buy", "rationale": "Metro coming"}
                ]}),
            ),
        );
        for id in StageId::ALL {
            run.stage_status.insert(id, StageStatus::Completed);
        }
        run.settle();

        let report = ReportSynthesizer::new().synthesize(&run);
        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(report.summary.as_deref(), Some("Buy Baner"));
        assert_eq!(report.outlooks["Pune"], "Rising");

        let fast = &report.areas["fast"];
        assert_eq!(fast.strategy, Some(Strategy::StrongBuy));
        assert_eq!(fast.rationale, "Metro coming");
        assert_eq!(fast.trend.as_deref(), Some("accelerating"));

        let slow = &report.areas["slow"];
        assert_eq!(slow.strategy, None);
        assert!(slow.rationale.contains("Ranked #2"));

        let text = report.to_string();
        assert!(text.contains("strong buy"));
    }
}
