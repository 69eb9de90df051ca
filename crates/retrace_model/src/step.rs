//! One unit of agent execution.

use serde::{Deserialize, Serialize};

/// Kind of work a step performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// A model invocation
    LlmCall,
    /// A tool invocation
    ToolCall,
    /// A branching decision
    Decision,
    /// Control handed to another agent
    Handoff,
    /// A guardrail evaluation
    Guardrail,
}

impl StepType {
    /// Wire name of the step type
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmCall => "llm_call",
            Self::ToolCall => "tool_call",
            Self::Decision => "decision",
            Self::Handoff => "handoff",
            Self::Guardrail => "guardrail",
        }
    }
}

/// Lifecycle status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet executed (or invalidated for replay)
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

/// Token and cost accounting for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
    /// Total tokens consumed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_total: Option<u64>,
    /// Cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Human-readable previews of a step's input and output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepPreview {
    /// Short title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short subtitle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Truncated input text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_preview: Option<String>,
    /// Truncated output text (mutated by replay)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
}

/// Tool-call dependency edges recorded on an `llm_call` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepIo {
    /// Tool-call ids this step emitted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emitted_tool_call_ids: Vec<String>,
    /// Tool-call ids this step consumed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_tool_call_ids: Vec<String>,
}

/// One unit of agent execution within a trace.
///
/// Steps form a tree through `parent_step_id`, but are stored as a flat
/// ordered list on the trace. Every step carries a non-empty id; the
/// store layer drops violating steps before they reach this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Stable identifier
    pub id: String,
    /// Monotonic position within the trace
    pub index: u32,
    /// Kind of work
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Display name
    pub name: String,
    /// Start timestamp (ISO-8601 UTC, millisecond precision)
    pub started_at: String,
    /// End timestamp, absent while pending or running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Duration in milliseconds, derivable from start/end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Lifecycle status
    pub status: StepStatus,
    /// Error text for failed steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structural parent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    /// Structural children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_step_ids: Vec<String>,
    /// Attempt number within a retry chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Step this one retried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of_step_id: Option<String>,
    /// Token/cost accounting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    /// Input/output previews
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<StepPreview>,
    /// Tool-call dependency edges (for `llm_call` steps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io: Option<StepIo>,
    /// Correlates a `tool_call` step to the calls that emitted/consumed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Step {
    /// Build a minimal completed step; fields beyond the basics default to
    /// empty. Primarily a construction convenience for callers and tests.
    #[must_use]
    pub fn new(id: impl Into<String>, index: u32, step_type: StepType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            step_type,
            name: name.into(),
            started_at: String::new(),
            ended_at: None,
            duration_ms: None,
            status: StepStatus::Completed,
            error: None,
            parent_step_id: None,
            child_step_ids: Vec::new(),
            attempt: None,
            retry_of_step_id: None,
            metrics: None,
            preview: None,
            io: None,
            tool_call_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&StepType::LlmCall).unwrap(),
            "\"llm_call\""
        );
        assert_eq!(
            serde_json::to_string(&StepType::ToolCall).unwrap(),
            "\"tool_call\""
        );
    }

    #[test]
    fn test_step_round_trip() {
        let mut step = Step::new("s1", 0, StepType::LlmCall, "plan");
        step.started_at = "2026-01-27T10:00:00.000Z".to_string();
        step.io = Some(StepIo {
            emitted_tool_call_ids: vec!["call-1".to_string()],
            consumed_tool_call_ids: Vec::new(),
        });

        let json = serde_json::to_string(&step).unwrap();
        let parsed: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_step_serializes_camel_case() {
        let mut step = Step::new("s1", 0, StepType::Decision, "route");
        step.tool_call_id = Some("call-9".to_string());
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"startedAt\""));
        assert!(json.contains("\"toolCallId\""));
        assert!(json.contains("\"type\":\"decision\""));
    }

    #[test]
    fn test_optional_fields_stripped() {
        let step = Step::new("s1", 0, StepType::Guardrail, "check");
        let json = serde_json::to_string(&step).unwrap();
        assert!(!json.contains("endedAt"));
        assert!(!json.contains("metrics"));
        assert!(!json.contains("childStepIds"));
    }
}
