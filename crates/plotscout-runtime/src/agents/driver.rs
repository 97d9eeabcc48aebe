//! Runs one stage: fans its prompts out through the router, validates every
//! reply and assembles the artifact.
//!
//! A reply that fails parsing, the output schema or the stage's own checks
//! gets exactly one corrective re-prompt that quotes the error. A second
//! invalid reply fails the stage.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value as JsonValue};
use std::time::Instant;

use super::parsing::{extract_json, validate_output, SchemaValidationError};
use super::prompts::correction;
use super::traits::{AgentStage, PromptTask, StageError, StageInput};
use crate::ledger::ProviderCallRecord;
use crate::providers::ChatMessage;
use crate::router::{CallScope, ProviderRouter};
use crate::run::StageArtifact;

struct TaskOutput {
    index: usize,
    key: String,
    output: JsonValue,
    records: Vec<ProviderCallRecord>,
}

/// Execute `stage` with at most `concurrency` prompts in flight.
pub async fn run_stage(
    stage: &dyn AgentStage,
    input: &StageInput<'_>,
    router: &ProviderRouter,
    scope: &CallScope<'_>,
    concurrency: usize,
) -> Result<StageArtifact, StageError> {
    let started = Instant::now();
    let tasks = stage.prompts(input)?;

    tracing::info!(stage = %stage.id(), tasks = tasks.len(), "Stage started");

    let mut inputs = vec![format!("snapshot:{}", input.snapshot.fingerprint())];
    inputs.extend(stage.dependencies().iter().map(|dep| format!("stage:{}", dep)));
    inputs.extend(tasks.iter().map(|t| format!("{}:{}", t.key, t.input_hash)));

    // Every started task runs to completion so its calls land in the ledger
    // and cache even when a sibling fails.
    let results: Vec<Result<TaskOutput, StageError>> =
        stream::iter(tasks.into_iter().enumerate())
            .map(|(index, task)| run_task(stage, index, task, input, router, scope))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    let mut done = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    done.sort_by_key(|t| t.index);

    let records: Vec<ProviderCallRecord> =
        done.iter().flat_map(|t| t.records.iter().cloned()).collect();

    let mut outputs: Vec<(String, JsonValue)> =
        done.into_iter().map(|t| (t.key, t.output)).collect();
    outputs.sort_by(|a, b| a.0.cmp(&b.0));

    tracing::info!(
        stage = %stage.id(),
        calls = records.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Stage completed"
    );

    Ok(StageArtifact {
        stage: stage.id(),
        capability: stage.capability().to_string(),
        inputs,
        output: stage.assemble(outputs),
        records,
        completed_at: Utc::now(),
    })
}

async fn run_task(
    stage: &dyn AgentStage,
    index: usize,
    task: PromptTask,
    input: &StageInput<'_>,
    router: &ProviderRouter,
    scope: &CallScope<'_>,
) -> Result<TaskOutput, StageError> {
    let params = json!({
        "stage": stage.id().as_str(),
        "task": task.key,
        "input_hash": task.input_hash,
    });

    let first = router
        .call(stage.capability(), &task.messages, &params, scope)
        .await?;
    let mut records = vec![first.record];

    let error = match check_reply(stage, &task.key, &first.text, input) {
        Ok(output) => {
            return Ok(TaskOutput {
                index,
                key: task.key,
                output,
                records,
            })
        }
        Err(error) => error,
    };

    tracing::warn!(
        stage = %stage.id(),
        task = %task.key,
        error = %error,
        "Invalid stage output, re-prompting"
    );

    let mut messages = task.messages;
    messages.push(ChatMessage::assistant(first.text));
    messages.push(ChatMessage::user(correction(&error)));

    let mut retry_params = params;
    retry_params["correction"] = json!(1);

    let second = router
        .call(stage.capability(), &messages, &retry_params, scope)
        .await?;
    records.push(second.record);

    match check_reply(stage, &task.key, &second.text, input) {
        Ok(output) => Ok(TaskOutput {
            index,
            key: task.key,
            output,
            records,
        }),
        Err(error) => Err(StageError::InvalidOutput {
            key: task.key,
            error,
        }),
    }
}

fn check_reply(
    stage: &dyn AgentStage,
    key: &str,
    text: &str,
    input: &StageInput<'_>,
) -> Result<JsonValue, SchemaValidationError> {
    let output = extract_json(text)?;
    validate_output(stage.id(), &output)?;
    stage.check(key, &output, input)?;
    Ok(output)
}
