//! One full recorded agent execution.

use crate::replay_info::ReplayInfo;
use crate::step::Step;
use serde::{Deserialize, Serialize};

/// Aggregate lifecycle status of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Steps still pending or running
    Running,
    /// All steps finished successfully
    Completed,
    /// At least one step failed
    Failed,
}

/// Aggregate metadata recorded alongside a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// Where the trace came from (recorder, import, manual)
    pub source: String,
    /// Agent that produced the execution
    pub agent_name: String,
    /// Model the agent ran on
    pub model_id: String,
    /// Wall-clock duration in milliseconds
    pub wall_time_ms: i64,
    /// Active work time in milliseconds, when measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_time_ms: Option<i64>,
    /// Total tokens across all steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Total cost in USD across all steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Number of failed steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    /// Number of retried steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl Default for TraceMetadata {
    fn default() -> Self {
        Self {
            source: "manual".to_string(),
            agent_name: "unknown".to_string(),
            model_id: "unknown".to_string(),
            wall_time_ms: 0,
            work_time_ms: None,
            total_tokens: None,
            total_cost_usd: None,
            error_count: None,
            retry_count: None,
        }
    }
}

/// One full recorded execution: an ordered flat list of steps plus
/// aggregate metadata and optional replay/merge lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Start timestamp (ISO-8601 UTC ms)
    pub started_at: String,
    /// End timestamp, absent while running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Aggregate status
    pub status: TraceStatus,
    /// Aggregate metadata
    pub metadata: TraceMetadata,
    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Trace this one was replayed or merged from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<String>,
    /// Step the lineage branched at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_point_step_id: Option<String>,
    /// Replay/merge provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayInfo>,
}

impl Trace {
    /// Look up a step by id
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Look up a step's `index` field by id
    #[must_use]
    pub fn step_index(&self, id: &str) -> Option<u32> {
        self.step(id).map(|step| step.index)
    }
}
