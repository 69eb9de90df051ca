//! Deterministic replay trace generation.
//!
//! Replaying the same (trace, pivot, strategy, modifications) tuple twice
//! must yield byte-identical output: the replay id, the shifted
//! timestamps, and the checkpoint signatures are all derived from a
//! SHA-256 digest of the canonical request, never from wall-clock state.

use crate::graph::DependencyGraph;
use retrace_core::{CoreResult, Digest, iso};
use retrace_model::{
    ReplayInfo, ReplayStrategy, Step, StepStatus, SystemMeta, Trace, TraceStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Derived replay starts land within 1s..6h of the source trace start.
const REPLAY_OFFSET_WINDOW_MS: u64 = 6 * 3600 * 1000;

/// Output preview text stamped onto invalidated steps
const INVALIDATED_PREVIEW: &str = "[invalidated for replay]";

/// Engine that derives a new trace from a recorded one
pub struct ReplayEngine;

impl ReplayEngine {
    /// Create a new replay engine (unit struct)
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Replay `trace` from `step_id` under `strategy`.
    ///
    /// The pivot contract is lenient: an unknown `step_id` produces an
    /// empty invalidation set rather than an error, so callers that have
    /// already validated existence pay nothing and partially-recorded
    /// traces stay replayable.
    ///
    /// # Errors
    ///
    /// Returns error only if the trace cannot be canonically serialized
    pub fn replay(
        &self,
        trace: &Trace,
        step_id: &str,
        strategy: ReplayStrategy,
        modifications: &BTreeMap<String, serde_json::Value>,
    ) -> CoreResult<Trace> {
        let digest = Digest::of_canonical(&(&trace.id, step_id, strategy, modifications))?;

        let mut replayed = trace.clone();
        replayed.id = format!("replay-{}", digest.hex_prefix(24));
        replayed.parent_trace_id = Some(trace.id.clone());
        replayed.branch_point_step_id = Some(step_id.to_string());

        let offset_ms = 1_000 + (digest.u64_from_hex_range(24, 32) % REPLAY_OFFSET_WINDOW_MS) as i64;
        let invalidated = invalidated_steps(trace, step_id, strategy);
        debug!(
            trace_id = %trace.id,
            replay_id = %replayed.id,
            strategy = %strategy,
            invalidated = invalidated.len(),
            "replay derived"
        );

        shift_times(&mut replayed, offset_ms);

        let created_at =
            iso::shift(&trace.started_at, offset_ms).unwrap_or_else(|| trace.started_at.clone());
        replayed.replay = Some(ReplayInfo {
            strategy,
            modified_step_id: step_id.to_string(),
            modifications: modifications.clone(),
            system: Some(SystemMeta {
                invalidated_step_ids: invalidated.iter().cloned().collect(),
                strategy: Some(strategy),
                job_id: None,
                scenario_id: None,
            }),
            created_at,
            checkpoints: None,
            merged_from_trace_ids: None,
        });

        apply_pivot_modification(&mut replayed, step_id, modifications);
        if !invalidated.is_empty() {
            invalidate(&mut replayed, &invalidated);
        }

        let checkpoints = checkpoint_signatures(&replayed.steps)?;
        if let Some(replay) = replayed.replay.as_mut() {
            replay.checkpoints = Some(checkpoints);
        }

        Ok(replayed)
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Short content-hash signature per step, for cheap downstream equality
/// checks without re-serializing whole steps.
///
/// # Errors
///
/// Returns error if a step cannot be canonically serialized
pub fn checkpoint_signatures(steps: &[Step]) -> CoreResult<BTreeMap<String, String>> {
    let mut checkpoints = BTreeMap::new();
    for step in steps {
        let digest = Digest::of_canonical(step)?;
        checkpoints.insert(step.id.clone(), digest.hex_prefix(16).to_string());
    }
    Ok(checkpoints)
}

fn invalidated_steps(trace: &Trace, step_id: &str, strategy: ReplayStrategy) -> BTreeSet<String> {
    match strategy {
        ReplayStrategy::Recorded => BTreeSet::new(),
        ReplayStrategy::Live => {
            let Some(cutoff) = trace.step_index(step_id) else {
                return BTreeSet::new();
            };
            trace
                .steps
                .iter()
                .filter(|step| step.index > cutoff)
                .map(|step| step.id.clone())
                .collect()
        }
        // The general case. Merge-strategy traces are produced by the
        // merge component, not replayed; if one arrives here it gets the
        // dependency walk.
        ReplayStrategy::Hybrid | ReplayStrategy::Merge => {
            DependencyGraph::build(trace).dependents_of(step_id)
        }
    }
}

/// Shift every timestamp in the trace by `delta_ms`, preserving relative
/// offsets exactly. Malformed timestamps are left unshifted; a malformed
/// end with a valid start collapses onto the shifted start.
fn shift_times(trace: &mut Trace, delta_ms: i64) {
    let Some(shifted_start) = iso::shift(&trace.started_at, delta_ms) else {
        return;
    };
    if let Some(ended) = &trace.ended_at {
        trace.ended_at = Some(iso::shift(ended, delta_ms).unwrap_or_else(|| shifted_start.clone()));
    }
    trace.started_at = shifted_start;

    for step in &mut trace.steps {
        let Some(step_start) = iso::shift(&step.started_at, delta_ms) else {
            continue;
        };
        if let Some(ended) = &step.ended_at {
            step.ended_at =
                Some(iso::shift(ended, delta_ms).unwrap_or_else(|| step_start.clone()));
        }
        step.started_at = step_start;
    }
}

fn apply_pivot_modification(
    trace: &mut Trace,
    step_id: &str,
    modifications: &BTreeMap<String, serde_json::Value>,
) {
    let Some(step) = trace.steps.iter_mut().find(|step| step.id == step_id) else {
        return;
    };
    let Some(preview) = step.preview.as_mut() else {
        return;
    };
    let suffix = if modifications.is_empty() {
        " (modified)".to_string()
    } else {
        let keys: Vec<&str> = modifications.keys().map(String::as_str).collect();
        format!(" (modified: {})", keys.join(", "))
    };
    match preview.output_preview.as_mut() {
        Some(output) => output.push_str(&suffix),
        None => preview.output_preview = Some(suffix.trim().to_string()),
    }
}

fn invalidate(trace: &mut Trace, invalidated: &BTreeSet<String>) {
    for step in &mut trace.steps {
        if !invalidated.contains(&step.id) {
            continue;
        }
        step.status = StepStatus::Pending;
        step.ended_at = None;
        step.duration_ms = None;
        step.metrics = None;
        if let Some(preview) = step.preview.as_mut() {
            preview.output_preview = Some(INVALIDATED_PREVIEW.to_string());
        }
    }
    trace.status = TraceStatus::Running;
    trace.ended_at = None;
}
