//! Replay job and scenario value types.

use retrace_model::ReplayStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shared lifecycle for jobs and scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not yet started
    Queued,
    /// At least one unit of work in flight
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by explicit cancellation
    Canceled,
}

impl RunState {
    /// Whether the state is terminal
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// One requested what-if variant inside a batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScenario {
    /// Identifier (`scn-` prefixed)
    pub id: String,
    /// Display name
    pub name: String,
    /// Replay strategy to run under
    pub strategy: ReplayStrategy,
    /// Modifications to apply at the pivot
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modifications: BTreeMap<String, serde_json::Value>,
    /// Lifecycle status
    pub status: RunState,
    /// When the scenario started running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the scenario reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Resulting trace id once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_trace_id: Option<String>,
    /// Error text once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A batch of replay scenarios against one (trace, pivot step) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayJob {
    /// Identifier (`job-` prefixed)
    pub id: String,
    /// Base trace the scenarios replay
    pub trace_id: String,
    /// Pivot step the scenarios replay from
    pub step_id: String,
    /// Requested scenarios, in submission order
    pub scenarios: Vec<ReplayScenario>,
    /// Aggregate lifecycle status
    pub status: RunState,
    /// When the job was created
    pub created_at: String,
    /// When the first scenario started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

impl ReplayJob {
    /// Look up a scenario by id
    #[must_use]
    pub fn scenario(&self, id: &str) -> Option<&ReplayScenario> {
        self.scenarios.iter().find(|scenario| scenario.id == id)
    }
}

/// Caller-supplied scenario request; omitted fields get defaults at job
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    /// Display name; defaults to `Scenario {n}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Replay strategy; defaults to hybrid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ReplayStrategy>,
    /// Modifications to apply at the pivot
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modifications: BTreeMap<String, serde_json::Value>,
}
