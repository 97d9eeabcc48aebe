//! Pipeline: scores the snapshot, then runs collector, analyst and advisor
//! in dependency order.
//!
//! A failed stage blocks its dependents; nothing downstream of it runs.
//! Given a prior run over the same snapshot, completed artifacts are carried
//! over and their call records seed the ledger, so no provider is invoked
//! for them again.
//!
//! No error escapes [`Pipeline::run`]: every outcome is recorded on the
//! returned [`PipelineRun`].

use plotscout_core::{GeoScorer, MarketSnapshot, ScoreTable, ScoringConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    run_stage, AdvisorStage, AgentStage, AnalystStage, CollectorStage, StageError, StageId,
    StageInput,
};
use crate::config::{ConfigError, RuntimeConfig, StageCapabilities};
use crate::fingerprint::Fingerprint;
use crate::ledger::{CallLedger, ProviderCallRecord};
use crate::resilience::LlmUsage;
use crate::router::{CallScope, ProviderRouter};
use crate::run::{PipelineRun, StageFailure, StageStatus};

/// Stage name recorded when scoring itself fails.
pub const SCORING_STEP: &str = "scoring";

/// Runs the stages against one router.
pub struct Pipeline {
    router: Arc<ProviderRouter>,
    scorer: Arc<GeoScorer>,
    stages: Vec<Box<dyn AgentStage>>,
    pool_size: usize,
    top_n: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("pool_size", &self.pool_size)
            .field("top_n", &self.top_n)
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn scorer(&self) -> &GeoScorer {
        &self.scorer
    }

    /// Execute the pipeline over `snapshot`.
    ///
    /// `prior` is used only when its snapshot fingerprint matches.
    /// Cancellation stops new provider calls; the stage in progress is
    /// recorded as failed with a `cancelled` error.
    pub async fn run(
        &self,
        snapshot: &MarketSnapshot,
        prior: Option<&PipelineRun>,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let fingerprint = snapshot.fingerprint();
        let mut run = PipelineRun::new(fingerprint.clone());

        let prior = prior.filter(|p| {
            let matches = p.snapshot_fingerprint == fingerprint;
            if !matches {
                tracing::info!(
                    prior = %p.snapshot_fingerprint,
                    current = %fingerprint,
                    "Snapshot changed since the prior run, starting fresh"
                );
            }
            matches
        });

        run.scores = match self.score(snapshot).await {
            Ok(scores) => scores,
            Err(message) => {
                tracing::error!(error = %message, "Scoring failed");
                run.errors.push(StageFailure {
                    stage: SCORING_STEP.to_string(),
                    message,
                });
                for id in StageId::ALL {
                    run.stage_status.insert(
                        id,
                        StageStatus::Blocked {
                            by: SCORING_STEP.to_string(),
                        },
                    );
                }
                run.settle();
                return run;
            }
        };

        let seeded: HashMap<Fingerprint, ProviderCallRecord> = prior
            .map(|p| {
                p.records
                    .iter()
                    .map(|r| (r.fingerprint.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let ledger = CallLedger::seeded(prior.map(|p| p.records.clone()).unwrap_or_default());
        let scope = CallScope {
            ledger: &ledger,
            cancel,
        };

        for stage in &self.stages {
            let id = stage.id();

            if let Some(artifact) = prior
                .filter(|p| p.is_stage_completed(id))
                .and_then(|p| p.artifact(id))
            {
                tracing::info!(stage = %id, "Reusing completed stage from prior run");
                run.artifacts.insert(id, artifact.clone());
                run.stage_status.insert(id, StageStatus::Completed);
                continue;
            }

            if let Some(dep) = stage
                .dependencies()
                .iter()
                .find(|dep| !run.stage_status(**dep).is_completed())
            {
                tracing::warn!(stage = %id, blocked_by = %dep, "Stage blocked");
                run.errors.push(StageFailure {
                    stage: id.to_string(),
                    message: format!("blocked: {} did not complete", dep),
                });
                run.stage_status.insert(id, StageStatus::Blocked { by: dep.to_string() });
                continue;
            }

            let result = {
                let input = StageInput {
                    snapshot,
                    scores: &run.scores,
                    artifacts: &run.artifacts,
                    top_n: self.top_n,
                };
                run_stage(stage.as_ref(), &input, &self.router, &scope, self.pool_size).await
            };

            match result {
                Ok(artifact) => {
                    run.artifacts.insert(id, artifact);
                    run.stage_status.insert(id, StageStatus::Completed);
                }
                Err(error) => {
                    if error == StageError::Cancelled {
                        tracing::warn!(stage = %id, "Stage cancelled");
                    } else {
                        tracing::error!(stage = %id, error = %error, "Stage failed");
                    }
                    let message = error.to_string();
                    run.errors.push(StageFailure {
                        stage: id.to_string(),
                        message: message.clone(),
                    });
                    run.stage_status.insert(id, StageStatus::Failed { error: message });
                }
            }
        }

        run.records = ledger.records();
        run.usage = usage_since(&run.records, &seeded);
        run.settle();

        tracing::info!(
            status = ?run.status,
            llm_calls = run.usage.llm_calls,
            cached = run.usage.cached_responses,
            "Pipeline finished"
        );
        run
    }

    async fn score(&self, snapshot: &MarketSnapshot) -> Result<ScoreTable, String> {
        let scorer = Arc::clone(&self.scorer);
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || scorer.score(&snapshot))
            .await
            .map_err(|e| format!("scorer task failed: {}", e))
    }
}

/// Usage for records created or replaced since the ledger was seeded.
fn usage_since(
    records: &[ProviderCallRecord],
    seeded: &HashMap<Fingerprint, ProviderCallRecord>,
) -> LlmUsage {
    let mut usage = LlmUsage::default();
    for record in records
        .iter()
        .filter(|r| seeded.get(&r.fingerprint) != Some(*r))
    {
        if record.served_from_cache {
            usage.record_cache_hit();
        } else if record.success {
            usage.add(&record.usage, record.model.as_deref().unwrap_or_default());
        }
    }
    usage
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    router: Option<Arc<ProviderRouter>>,
    scoring: ScoringConfig,
    stages: StageCapabilities,
    pool_size: usize,
    top_n: usize,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        let config = RuntimeConfig::default();
        Self {
            router: None,
            scoring: config.scoring,
            stages: config.stages,
            pool_size: config.concurrency.pool_size,
            top_n: config.advisor.top_n,
        }
    }

    /// Take scoring, stage, concurrency and advisor settings from `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            router: None,
            scoring: config.scoring.clone(),
            stages: config.stages.clone(),
            pool_size: config.concurrency.pool_size,
            top_n: config.advisor.top_n,
        }
    }

    pub fn router(mut self, router: Arc<ProviderRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Capability each stage routes to.
    pub fn stages(mut self, stages: StageCapabilities) -> Self {
        self.stages = stages;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Build the pipeline.
    ///
    /// Fails when no router is set, a stage's capability has no route, or
    /// the scoring configuration is invalid.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let router = self
            .router
            .ok_or_else(|| ConfigError::Invalid("no provider router set".to_string()))?;

        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.pool_size must be at least 1".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("advisor.top_n must be at least 1".to_string()));
        }

        let stages: Vec<Box<dyn AgentStage>> = vec![
            Box::new(CollectorStage::new(self.stages.collector.clone())),
            Box::new(AnalystStage::new(self.stages.analyst.clone())),
            Box::new(AdvisorStage::new(self.stages.advisor.clone())),
        ];
        if let Some(stage) = stages
            .iter()
            .find(|s| !router.has_capability(s.capability()))
        {
            return Err(ConfigError::Invalid(format!(
                "stage '{}' uses capability '{}' which has no providers",
                stage.id(),
                stage.capability()
            )));
        }

        let scorer = GeoScorer::new(self.scoring, self.pool_size)?;

        Ok(Pipeline {
            router,
            scorer: Arc::new(scorer),
            stages,
            pool_size: self.pool_size,
            top_n: self.top_n,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::providers::{LlmProvider, ScriptedProvider, ScriptedReply, TokenUsage};
    use crate::resilience::CallPolicy;
    use crate::router::CapabilityRoute;
    use crate::run::RunStatus;
    use plotscout_core::ScoreWeights;

    fn router_with(capabilities: &[&str]) -> Arc<ProviderRouter> {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new("scripted"));
        let mut router = ProviderRouter::new(Arc::new(ResponseCache::default()));
        for capability in capabilities {
            router.add_route(
                *capability,
                CapabilityRoute::new(vec![provider.clone()], CallPolicy::default()),
            );
        }
        Arc::new(router)
    }

    #[test]
    fn test_build_requires_router() {
        let err = PipelineBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("router"));
    }

    #[test]
    fn test_build_checks_stage_capabilities() {
        let err = PipelineBuilder::new()
            .router(router_with(&["reasoning"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("summarization"));

        let pipeline = PipelineBuilder::new()
            .router(router_with(&["reasoning", "summarization"]))
            .build()
            .unwrap();
        assert_eq!(pipeline.stages.len(), 3);
    }

    #[test]
    fn test_build_rejects_bad_weights() {
        let mut scoring = ScoringConfig::default();
        scoring.weights = ScoreWeights::new(0.5, 0.5, 0.5);
        let err = PipelineBuilder::new()
            .router(router_with(&["reasoning", "summarization"]))
            .scoring(scoring)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Scoring(_)));
    }

    #[test]
    fn test_usage_ignores_seeded_records() {
        let fp = |s: &str| Fingerprint::compute("reasoning", &[], &serde_json::json!({ "k": s }));
        let old = ProviderCallRecord::cache_hit(fp("old"), "reasoning", None, "p", "scripted");
        let seeded = HashMap::from([(old.fingerprint.clone(), old.clone())]);

        let mut fresh = ProviderCallRecord::cache_hit(fp("new"), "reasoning", None, "p", "scripted");
        fresh.served_from_cache = false;
        fresh.attempts = 1;
        fresh.usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Default::default()
        };
        let hit = ProviderCallRecord::cache_hit(fp("hit"), "reasoning", None, "p", "scripted");

        let usage = usage_since(&[old, fresh, hit], &seeded);
        assert_eq!(usage.llm_calls, 1);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.cached_responses, 1);
    }

    #[tokio::test]
    async fn test_changed_snapshot_ignores_prior() {
        let reply = ScriptedReply::Text(
            r#"{"summary": "s", "notable_localities": [], "data_gaps": []}"#.into(),
        );
        let provider = Arc::new(ScriptedProvider::new("scripted").fallback(reply));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![provider.clone()];
        let router = ProviderRouter::new(Arc::new(ResponseCache::default()))
            .with_route("summarization", CapabilityRoute::new(providers.clone(), CallPolicy::default()))
            .with_route("reasoning", CapabilityRoute::new(providers, CallPolicy::default()));
        let pipeline = PipelineBuilder::new().router(Arc::new(router)).build().unwrap();

        let snapshot = MarketSnapshot::from_yaml(
            "areas:\n  - { id: a, city: Pune, locality: Baner }\n",
        )
        .unwrap();
        let mut prior = PipelineRun::new("some-other-snapshot");
        prior.stage_status.insert(StageId::Collector, StageStatus::Completed);

        let run = pipeline.run(&snapshot, Some(&prior), &CancellationToken::new()).await;

        // Collector ran; analyst reply fails its schema twice
        assert_eq!(run.status, RunStatus::Partial);
        assert!(run.is_stage_completed(StageId::Collector));
        assert!(provider.invocations() >= 1);
        assert_eq!(
            run.stage_status(StageId::Advisor),
            &StageStatus::Blocked {
                by: "analyst".into()
            }
        );
        assert_eq!(run.scores.len(), 1);
    }
}
