//! Per-scenario metrics matrix and causal factor ranking.
//!
//! Each completed scenario is diffed against the base trace, producing a
//! row of outcome deltas. Ranking then attributes those deltas to the
//! modification keys the scenarios carried: a factor that consistently
//! shows up in improved rows earns a high confidence-weighted score.

use crate::job::{ReplayJob, RunState};
use retrace_core::{CoreResult, round_dp};
use retrace_model::TraceStore;
use retrace_replay::DiffEngine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome deltas of one completed scenario against the base trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMetrics {
    /// Cost delta in USD, rounded to 6 places
    pub cost_delta_usd: f64,
    /// Wall-time delta in milliseconds
    pub wall_time_delta_ms: i64,
    /// Error-count delta
    pub error_delta: i64,
    /// Retry-count delta
    pub retry_delta: i64,
    /// Number of changed aligned steps
    pub changed_steps: usize,
    /// Number of added steps
    pub added_steps: usize,
    /// Number of removed steps
    pub removed_steps: usize,
    /// Steps the replay invalidated
    pub invalidated_step_count: usize,
}

/// One scenario's row in the matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    /// Scenario id
    pub scenario_id: String,
    /// Scenario display name
    pub name: String,
    /// Strategy the scenario ran under
    pub strategy: retrace_model::ReplayStrategy,
    /// Scenario lifecycle status
    pub status: RunState,
    /// Resulting trace id, if completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_trace_id: Option<String>,
    /// Modifications the scenario applied
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modifications: BTreeMap<String, serde_json::Value>,
    /// Scenario error, if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Left ids of aligned pairs whose outcome changed
    pub changed_step_ids: Vec<String>,
    /// Steps present only in the replay
    pub added_step_ids: Vec<String>,
    /// Steps present only in the base
    pub removed_step_ids: Vec<String>,
    /// Outcome deltas; `None` for non-completed scenarios
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RowMetrics>,
}

/// Evidence backing one ranked factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorEvidence {
    /// Number of completed rows carrying the factor
    pub samples: usize,
    /// Up to 3 `key=value` examples, truncated to 80 chars
    pub examples: Vec<String>,
    /// Rows where the factor coincided with an improvement
    pub positive: usize,
    /// Rows where it coincided with a regression
    pub negative: usize,
}

/// One modification key ranked by causal impact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalFactor {
    /// The modification key
    pub factor: String,
    /// Confidence-weighted mean impact score, rounded to 4 places
    pub score: f64,
    /// Share of completed rows carrying the factor, capped at 1.0
    pub confidence: f64,
    /// Supporting evidence
    pub evidence: FactorEvidence,
}

/// The full matrix for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMatrix {
    /// Owning job id
    pub job_id: String,
    /// Base trace id
    pub trace_id: String,
    /// Pivot step id
    pub step_id: String,
    /// One row per scenario, in submission order
    pub rows: Vec<MatrixRow>,
    /// Factors ranked by confidence-weighted impact
    pub causal_ranking: Vec<CausalFactor>,
}

/// Build the matrix for a job by diffing each completed scenario's
/// replay trace against the base.
///
/// # Errors
///
/// Returns `CoreError::NotFound` if the base trace or a completed
/// scenario's replay trace is missing from the store
pub fn build_matrix(job: &ReplayJob, store: &dyn TraceStore) -> CoreResult<TraceMatrix> {
    let base = store.get_trace(&job.trace_id)?;
    let base_cost = base.metadata.total_cost_usd.unwrap_or(0.0);
    let base_errors = i64::from(base.metadata.error_count.unwrap_or(0));
    let base_retries = i64::from(base.metadata.retry_count.unwrap_or(0));
    let base_wall = base.metadata.wall_time_ms;

    let diff_engine = DiffEngine::new();
    let mut rows = Vec::with_capacity(job.scenarios.len());
    for scenario in &job.scenarios {
        let mut row = MatrixRow {
            scenario_id: scenario.id.clone(),
            name: scenario.name.clone(),
            strategy: scenario.strategy,
            status: scenario.status,
            replay_trace_id: scenario.replay_trace_id.clone(),
            modifications: scenario.modifications.clone(),
            error: scenario.error.clone(),
            changed_step_ids: Vec::new(),
            added_step_ids: Vec::new(),
            removed_step_ids: Vec::new(),
            metrics: None,
        };

        if scenario.status == RunState::Completed {
            if let Some(replay_trace_id) = &scenario.replay_trace_id {
                let replay_trace = store.get_trace(replay_trace_id)?;
                let delta = diff_engine.compare(&base, &replay_trace);
                let invalidated_step_count = replay_trace
                    .replay
                    .as_ref()
                    .and_then(|replay| replay.system.as_ref())
                    .map_or(0, |system| system.invalidated_step_ids.len());

                row.metrics = Some(RowMetrics {
                    cost_delta_usd: round_dp(
                        replay_trace.metadata.total_cost_usd.unwrap_or(0.0) - base_cost,
                        6,
                    ),
                    wall_time_delta_ms: replay_trace.metadata.wall_time_ms - base_wall,
                    error_delta: i64::from(replay_trace.metadata.error_count.unwrap_or(0))
                        - base_errors,
                    retry_delta: i64::from(replay_trace.metadata.retry_count.unwrap_or(0))
                        - base_retries,
                    changed_steps: delta.changed_step_ids.len(),
                    added_steps: delta.added_step_ids.len(),
                    removed_steps: delta.removed_step_ids.len(),
                    invalidated_step_count,
                });
                row.changed_step_ids = delta.changed_step_ids;
                row.added_step_ids = delta.added_step_ids;
                row.removed_step_ids = delta.removed_step_ids;
            }
        }
        rows.push(row);
    }

    let causal_ranking = rank_factors(&rows);
    Ok(TraceMatrix {
        job_id: job.id.clone(),
        trace_id: job.trace_id.clone(),
        step_id: job.step_id.clone(),
        rows,
        causal_ranking,
    })
}

/// Rank modification factors by how consistently the scenarios carrying
/// them improved the outcome. Only completed rows participate.
#[must_use]
pub fn rank_factors(rows: &[MatrixRow]) -> Vec<CausalFactor> {
    let completed: Vec<&MatrixRow> = rows
        .iter()
        .filter(|row| row.status == RunState::Completed)
        .collect();
    let denominator = completed.len().max(1);

    let mut factor_scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut factor_examples: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for row in &completed {
        let score = row.metrics.as_ref().map_or(0.0, impact_score);
        for (factor, value) in &row.modifications {
            factor_scores.entry(factor.clone()).or_default().push(score);
            let examples = factor_examples.entry(factor.clone()).or_default();
            if examples.len() < 3 {
                examples.push(compact_example(factor, value));
            }
        }
    }

    let mut ranked: Vec<CausalFactor> = factor_scores
        .into_iter()
        .map(|(factor, scores)| {
            let avg_score = scores.iter().sum::<f64>() / scores.len() as f64;
            let confidence = (scores.len() as f64 / denominator as f64).min(1.0);
            CausalFactor {
                score: round_dp(avg_score * confidence, 4),
                confidence: round_dp(confidence, 3),
                evidence: FactorEvidence {
                    samples: scores.len(),
                    examples: factor_examples.remove(&factor).unwrap_or_default(),
                    positive: scores.iter().filter(|score| **score > 0.0).count(),
                    negative: scores.iter().filter(|score| **score < 0.0).count(),
                },
                factor,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.factor.cmp(&b.factor))
    });
    ranked
}

/// Impact of one scenario's deltas; positive means the scenario improved
/// the outcome (lower latency/cost/errors/retries/churn).
fn impact_score(metrics: &RowMetrics) -> f64 {
    let wall_component = -(metrics.wall_time_delta_ms as f64) / 1000.0;
    let cost_component = -metrics.cost_delta_usd * 100.0;
    let error_component = -(metrics.error_delta as f64) * 2.0;
    let retry_component = -(metrics.retry_delta as f64) * 0.5;
    let churn_penalty = (metrics.changed_steps as f64 - 5.0).max(0.0) * -0.05;
    wall_component + cost_component + error_component + retry_component + churn_penalty
}

fn compact_example(factor: &str, value: &serde_json::Value) -> String {
    let rendered = match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let text = format!("{}={}", factor, rendered);
    if text.chars().count() <= 80 {
        text
    } else {
        let truncated: String = text.chars().take(77).collect();
        format!("{}...", truncated)
    }
}
