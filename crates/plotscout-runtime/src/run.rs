//! Run state: stage artifacts, statuses and the pipeline run record.
//!
//! A [`PipelineRun`] is plain serializable data so it can be written to the
//! state directory and handed back to a later run for resume.

use chrono::{DateTime, Utc};
use plotscout_core::ScoreTable;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::agents::StageId;
use crate::ledger::ProviderCallRecord;
use crate::resilience::LlmUsage;

/// Immutable output of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact {
    pub stage: StageId,

    pub capability: String,

    /// What the stage read: snapshot fingerprint, upstream stages and the
    /// hash of every prompt payload
    pub inputs: Vec<String>,

    /// Validated structured output
    pub output: JsonValue,

    /// Calls consumed, in task order
    pub records: Vec<ProviderCallRecord>,

    pub completed_at: DateTime<Utc>,
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Completed,
    Failed { error: String },
    /// Not executed because an upstream step did not complete
    Blocked { by: String },
}

impl StageStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageStatus::Completed)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    /// Every stage completed
    Complete,
    /// The first stage completed but a later one failed or was blocked
    Partial,
    /// Nothing usable beyond the scores
    Failed,
}

/// Human-readable explanation for a stage that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Stage name, or `scoring`
    pub stage: String,
    pub message: String,
}

/// Everything one pipeline invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Fingerprint of the snapshot this run scored
    pub snapshot_fingerprint: String,

    pub status: RunStatus,

    pub scores: ScoreTable,

    /// Completed artifacts in stage order
    pub artifacts: BTreeMap<StageId, StageArtifact>,

    pub stage_status: BTreeMap<StageId, StageStatus>,

    pub errors: Vec<StageFailure>,

    /// Call ledger at the end of the run, including records carried over
    /// from a resumed run
    pub records: Vec<ProviderCallRecord>,

    /// Usage incurred by this run only
    pub usage: LlmUsage,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(snapshot_fingerprint: impl Into<String>) -> Self {
        Self {
            snapshot_fingerprint: snapshot_fingerprint.into(),
            status: RunStatus::Pending,
            scores: ScoreTable::default(),
            artifacts: BTreeMap::new(),
            stage_status: StageId::ALL
                .iter()
                .map(|id| (*id, StageStatus::Pending))
                .collect(),
            errors: Vec::new(),
            records: Vec::new(),
            usage: LlmUsage::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn artifact(&self, stage: StageId) -> Option<&StageArtifact> {
        self.artifacts.get(&stage)
    }

    pub fn stage_status(&self, stage: StageId) -> &StageStatus {
        self.stage_status.get(&stage).unwrap_or(&StageStatus::Pending)
    }

    pub fn is_stage_completed(&self, stage: StageId) -> bool {
        self.stage_status(stage).is_completed() && self.artifacts.contains_key(&stage)
    }

    /// Derive the terminal status from the stage statuses.
    pub(crate) fn settle(&mut self) {
        let first = StageId::ALL[0];
        self.status = if StageId::ALL.iter().all(|id| self.stage_status(*id).is_completed()) {
            RunStatus::Complete
        } else if self.stage_status(first).is_completed() {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }
}
