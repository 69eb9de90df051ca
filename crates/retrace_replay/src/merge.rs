//! Three-way merge of two replay branches.
//!
//! Both branches derive from a common base, so the three traces are
//! assumed to share one step-id set; resolution walks the base's step
//! order and picks, per step, whichever branch changed from base
//! according to the configured preference.

use crate::engine::checkpoint_signatures;
use chrono::Utc;
use retrace_core::{CoreResult, Digest, canonical_json, iso};
use retrace_model::{
    MergeStrategy, ReplayInfo, ReplayStrategy, Step, StepMetrics, StepPreview, StepStatus, Trace,
    TraceMetadata, TraceStatus,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Merge two replay branches derived from `base` into one trace.
///
/// The merge id is derived from the four inputs, so re-merging identical
/// inputs yields the same trace id.
///
/// # Errors
///
/// Returns error if a step cannot be canonically serialized
pub fn merge_replays(
    base: &Trace,
    left: &Trace,
    right: &Trace,
    strategy: MergeStrategy,
) -> CoreResult<Trace> {
    let mut merged = base.clone();
    merged.id = deterministic_merge_id(&base.id, &left.id, &right.id, strategy);
    merged.parent_trace_id = Some(base.id.clone());
    merged.branch_point_step_id = base.branch_point_step_id.clone();

    let left_by_id: HashMap<&str, &Step> =
        left.steps.iter().map(|step| (step.id.as_str(), step)).collect();
    let right_by_id: HashMap<&str, &Step> =
        right.steps.iter().map(|step| (step.id.as_str(), step)).collect();

    let mut merged_steps = Vec::with_capacity(base.steps.len());
    for base_step in &base.steps {
        let chosen = pick_step(
            base_step,
            left_by_id.get(base_step.id.as_str()).copied(),
            right_by_id.get(base_step.id.as_str()).copied(),
            strategy,
        )?;
        merged_steps.push(chosen.clone());
    }
    merged.steps = merged_steps;

    merged.metadata = combine_metadata(&base.metadata, &left.metadata, &right.metadata);
    merged.status = merged_status(&merged.steps);
    merged.started_at = earliest_start(base, left, right);
    merged.ended_at = latest_end(base, left, right);

    let mut modifications = BTreeMap::new();
    modifications.insert(
        "mergeStrategy".to_string(),
        serde_json::Value::String(strategy.as_str().to_string()),
    );
    let merged_from: BTreeSet<String> = [left.id.clone(), right.id.clone()].into();
    merged.replay = Some(ReplayInfo {
        strategy: ReplayStrategy::Merge,
        modified_step_id: String::new(),
        modifications,
        system: None,
        created_at: iso::format(Utc::now()),
        checkpoints: Some(checkpoint_signatures(&merged.steps)?),
        merged_from_trace_ids: Some(merged_from.into_iter().collect()),
    });

    debug!(
        merge_id = %merged.id,
        left_id = %left.id,
        right_id = %right.id,
        strategy = %strategy,
        "branches merged"
    );
    Ok(merged)
}

fn deterministic_merge_id(
    base_id: &str,
    left_id: &str,
    right_id: &str,
    strategy: MergeStrategy,
) -> String {
    let payload = format!("{}|{}|{}|{}", base_id, left_id, right_id, strategy);
    format!("merge-{}", Digest::of_str(&payload).hex_prefix(24))
}

/// Signature fields for the changed-from-base test. Wider than the diff
/// component's outcome signature: full preview/metrics object equality,
/// timestamps, and error text all count as a change here.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepSignature<'a> {
    status: StepStatus,
    started_at: &'a str,
    ended_at: Option<&'a String>,
    duration_ms: Option<i64>,
    error: Option<&'a String>,
    preview: Option<&'a StepPreview>,
    metrics: Option<&'a StepMetrics>,
}

fn signature(step: &Step) -> CoreResult<String> {
    canonical_json(&StepSignature {
        status: step.status,
        started_at: &step.started_at,
        ended_at: step.ended_at.as_ref(),
        duration_ms: step.duration_ms,
        error: step.error.as_ref(),
        preview: step.preview.as_ref(),
        metrics: step.metrics.as_ref(),
    })
}

fn pick_step<'a>(
    base_step: &'a Step,
    left_step: Option<&'a Step>,
    right_step: Option<&'a Step>,
    strategy: MergeStrategy,
) -> CoreResult<&'a Step> {
    // A branch missing the step falls back to base for that candidate.
    let left = left_step.unwrap_or(base_step);
    let right = right_step.unwrap_or(base_step);

    let base_signature = signature(base_step)?;
    let left_changed = signature(left)? != base_signature;
    let right_changed = signature(right)? != base_signature;

    let chosen = match strategy {
        MergeStrategy::PreferLeft => {
            if left_changed {
                left
            } else if right_changed {
                right
            } else {
                left
            }
        }
        MergeStrategy::PreferRight => {
            if right_changed {
                right
            } else if left_changed {
                left
            } else {
                right
            }
        }
    };
    Ok(chosen)
}

/// Pairwise maximum of each numeric field across base/left/right.
///
/// A conservative placeholder rather than a true reconciliation: the
/// merged error count can never decrease even when a merge eliminates an
/// error path.
fn combine_metadata(
    base: &TraceMetadata,
    left: &TraceMetadata,
    right: &TraceMetadata,
) -> TraceMetadata {
    TraceMetadata {
        source: base.source.clone(),
        agent_name: base.agent_name.clone(),
        model_id: base.model_id.clone(),
        wall_time_ms: base.wall_time_ms.max(left.wall_time_ms).max(right.wall_time_ms),
        work_time_ms: max_opt_i64(base.work_time_ms, left.work_time_ms, right.work_time_ms),
        total_tokens: max_opt_u64(base.total_tokens, left.total_tokens, right.total_tokens),
        total_cost_usd: max_opt_f64(
            base.total_cost_usd,
            left.total_cost_usd,
            right.total_cost_usd,
        ),
        error_count: max_opt_u32(base.error_count, left.error_count, right.error_count),
        retry_count: max_opt_u32(base.retry_count, left.retry_count, right.retry_count),
    }
}

fn max_opt_i64(a: Option<i64>, b: Option<i64>, c: Option<i64>) -> Option<i64> {
    Some(a.unwrap_or(0).max(b.unwrap_or(0)).max(c.unwrap_or(0)))
}

fn max_opt_u64(a: Option<u64>, b: Option<u64>, c: Option<u64>) -> Option<u64> {
    Some(a.unwrap_or(0).max(b.unwrap_or(0)).max(c.unwrap_or(0)))
}

fn max_opt_u32(a: Option<u32>, b: Option<u32>, c: Option<u32>) -> Option<u32> {
    Some(a.unwrap_or(0).max(b.unwrap_or(0)).max(c.unwrap_or(0)))
}

fn max_opt_f64(a: Option<f64>, b: Option<f64>, c: Option<f64>) -> Option<f64> {
    Some(
        a.unwrap_or(0.0)
            .max(b.unwrap_or(0.0))
            .max(c.unwrap_or(0.0)),
    )
}

fn merged_status(steps: &[Step]) -> TraceStatus {
    if steps.iter().any(|step| step.status == StepStatus::Failed) {
        return TraceStatus::Failed;
    }
    if steps
        .iter()
        .any(|step| matches!(step.status, StepStatus::Running | StepStatus::Pending))
    {
        return TraceStatus::Running;
    }
    TraceStatus::Completed
}

/// ISO strings in one fixed format order lexicographically, so string
/// min/max is chronological.
fn earliest_start(base: &Trace, left: &Trace, right: &Trace) -> String {
    [&base.started_at, &left.started_at, &right.started_at]
        .into_iter()
        .filter(|s| !s.is_empty())
        .min()
        .cloned()
        .unwrap_or_else(|| base.started_at.clone())
}

fn latest_end(base: &Trace, left: &Trace, right: &Trace) -> Option<String> {
    [&base.ended_at, &left.ended_at, &right.ended_at]
        .into_iter()
        .filter_map(|end| end.as_ref())
        .max()
        .cloned()
        .or_else(|| base.ended_at.clone())
}
