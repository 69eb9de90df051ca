//! Step alignment and trace diffing.
//!
//! Two traces rarely share every step id: a replay keeps the original
//! ids, but a re-recorded or live-executed variant mints new ones.
//! Alignment therefore runs three passes, each consuming matched ids:
//! exact id match, tool-call correlation, then a fuzzy match on
//! `type:name` signature and relative start time.

use retrace_core::{iso, round_dp};
use retrace_model::{Step, StepStatus, Trace};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One aligned (left, right) step pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedPair {
    /// Step id in the left trace
    pub left_id: String,
    /// Step id in the right trace
    pub right_id: String,
}

/// Delta between two traces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDelta {
    /// Right-side steps with no left counterpart (right trace order)
    pub added_step_ids: Vec<String>,
    /// Left-side steps with no right counterpart (left trace order)
    pub removed_step_ids: Vec<String>,
    /// Left ids of aligned pairs whose outcome signature differs
    pub changed_step_ids: Vec<String>,
    /// Aligned pairs whose outcome signature differs
    pub changed_pairs: Vec<AlignedPair>,
    /// All aligned pairs
    pub aligned_pairs: Vec<AlignedPair>,
    /// `right.total_cost_usd - left.total_cost_usd`, rounded to 6 places
    pub cost_delta_usd: f64,
    /// `right.wall_time_ms - left.wall_time_ms`
    pub wall_time_delta_ms: i64,
}

/// Engine for aligning and diffing two traces
pub struct DiffEngine;

impl DiffEngine {
    /// Create a new diff engine (unit struct)
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compare two traces.
    ///
    /// Raises nothing for well-formed traces; callers resolve trace ids
    /// to values themselves.
    #[must_use]
    pub fn compare(&self, left: &Trace, right: &Trace) -> TraceDelta {
        let aligned = align_steps(left, right);
        let aligned_left: HashSet<&str> = aligned.iter().map(|(l, _)| l.as_str()).collect();
        let aligned_right: HashSet<&str> = aligned.iter().map(|(_, r)| r.as_str()).collect();

        let added_step_ids = right
            .steps
            .iter()
            .filter(|step| !aligned_right.contains(step.id.as_str()))
            .map(|step| step.id.clone())
            .collect();
        let removed_step_ids = left
            .steps
            .iter()
            .filter(|step| !aligned_left.contains(step.id.as_str()))
            .map(|step| step.id.clone())
            .collect();

        let mut changed_pairs = Vec::new();
        for (left_id, right_id) in &aligned {
            let (Some(left_step), Some(right_step)) = (left.step(left_id), right.step(right_id))
            else {
                continue;
            };
            if outcome_signature(left_step) != outcome_signature(right_step) {
                changed_pairs.push(AlignedPair {
                    left_id: left_id.clone(),
                    right_id: right_id.clone(),
                });
            }
        }
        let changed_step_ids = changed_pairs.iter().map(|pair| pair.left_id.clone()).collect();

        let cost_delta_usd = round_dp(
            right.metadata.total_cost_usd.unwrap_or(0.0)
                - left.metadata.total_cost_usd.unwrap_or(0.0),
            6,
        );
        let wall_time_delta_ms = right.metadata.wall_time_ms - left.metadata.wall_time_ms;

        TraceDelta {
            added_step_ids,
            removed_step_ids,
            changed_step_ids,
            changed_pairs,
            aligned_pairs: aligned
                .into_iter()
                .map(|(left_id, right_id)| AlignedPair { left_id, right_id })
                .collect(),
            cost_delta_usd,
            wall_time_delta_ms,
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-step outcome signature for changed-step detection
fn outcome_signature(step: &Step) -> (StepStatus, Option<&str>, Option<f64>) {
    (
        step.status,
        step.preview.as_ref().and_then(|p| p.output_preview.as_deref()),
        step.metrics.as_ref().and_then(|m| m.cost_usd),
    )
}

/// `type:name` signature for fuzzy matching
fn fuzzy_signature(step: &Step) -> String {
    format!("{}:{}", step.step_type.as_str(), step.name)
}

/// Step start relative to its own trace's start, per step id.
///
/// `None` when either timestamp fails to parse.
fn relative_starts(trace: &Trace) -> HashMap<&str, Option<i64>> {
    trace
        .steps
        .iter()
        .map(|step| {
            (
                step.id.as_str(),
                iso::delta_ms(&step.started_at, &trace.started_at),
            )
        })
        .collect()
}

/// Fuzzy-match acceptance threshold: 10% of the longer wall time,
/// clamped to [1000, 5000] ms. A pair is accepted strictly below the
/// threshold, so two steps exactly `T` ms apart do not align.
fn alignment_threshold(left: &Trace, right: &Trace) -> i64 {
    let base = left
        .metadata
        .wall_time_ms
        .max(right.metadata.wall_time_ms)
        .max(1);
    ((base as f64) * 0.10).round() as i64
}

fn align_steps(left: &Trace, right: &Trace) -> Vec<(String, String)> {
    let mut aligned = Vec::new();
    let mut left_unmatched: HashSet<&str> = left.steps.iter().map(|s| s.id.as_str()).collect();
    let mut right_unmatched: HashSet<&str> = right.steps.iter().map(|s| s.id.as_str()).collect();

    // Pass 1: exact id matches, in sorted id order.
    let mut shared: Vec<&str> = left_unmatched
        .intersection(&right_unmatched)
        .copied()
        .collect();
    shared.sort_unstable();
    for id in shared {
        aligned.push((id.to_string(), id.to_string()));
        left_unmatched.remove(id);
        right_unmatched.remove(id);
    }

    // Pass 2: tool-call correlation. Later right steps win duplicate ids.
    let mut right_by_tool: HashMap<&str, &str> = HashMap::new();
    for step in &right.steps {
        if let Some(call_id) = &step.tool_call_id {
            right_by_tool.insert(call_id.as_str(), step.id.as_str());
        }
    }
    for step in &left.steps {
        if !left_unmatched.contains(step.id.as_str()) {
            continue;
        }
        let Some(call_id) = &step.tool_call_id else {
            continue;
        };
        if let Some(&right_id) = right_by_tool.get(call_id.as_str()) {
            if right_unmatched.remove(right_id) {
                left_unmatched.remove(step.id.as_str());
                aligned.push((step.id.clone(), right_id.to_string()));
            }
        }
    }

    // Pass 3: fuzzy temporal + signature match.
    let left_rel = relative_starts(left);
    let right_rel = relative_starts(right);
    let threshold = alignment_threshold(left, right).clamp(1000, 5000);

    let mut candidates: HashMap<String, Vec<&str>> = HashMap::new();
    for step in &right.steps {
        if !right_unmatched.contains(step.id.as_str()) {
            continue;
        }
        candidates
            .entry(fuzzy_signature(step))
            .or_default()
            .push(step.id.as_str());
    }
    // Ties go to the earliest candidate; stable sort keeps trace order
    // among equal relative starts.
    for ids in candidates.values_mut() {
        ids.sort_by_key(|id| right_rel.get(*id).copied().flatten().unwrap_or(0));
    }

    for step in &left.steps {
        if !left_unmatched.contains(step.id.as_str()) {
            continue;
        }
        let Some(start_ms) = left_rel.get(step.id.as_str()).copied().flatten() else {
            continue;
        };
        let Some(ids) = candidates.get_mut(&fuzzy_signature(step)) else {
            continue;
        };
        let mut best: Option<(usize, i64)> = None;
        for (pos, right_id) in ids.iter().enumerate() {
            let Some(right_start) = right_rel.get(*right_id).copied().flatten() else {
                continue;
            };
            let delta = (right_start - start_ms).abs();
            if best.is_none_or(|(_, best_delta)| delta < best_delta) {
                best = Some((pos, delta));
            }
        }
        if let Some((pos, delta)) = best {
            if delta < threshold {
                let right_id = ids.remove(pos);
                left_unmatched.remove(step.id.as_str());
                right_unmatched.remove(right_id);
                aligned.push((step.id.clone(), right_id.to_string()));
            }
        }
    }

    aligned
}
