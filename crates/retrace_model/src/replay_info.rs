//! Replay provenance attached to traces produced by replay or merge.

use retrace_core::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a replay treats steps downstream of the pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStrategy {
    /// Trust every recorded step verbatim
    Recorded,
    /// Invalidate everything positionally after the pivot
    Live,
    /// Invalidate only causally dependent steps
    Hybrid,
    /// Trace produced by a three-way merge
    Merge,
}

impl ReplayStrategy {
    /// Wire name of the strategy
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Live => "live",
            Self::Hybrid => "hybrid",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ReplayStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-step preference when merging two replay branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Take the left branch's step when it changed from base
    PreferLeft,
    /// Take the right branch's step when it changed from base
    PreferRight,
}

impl MergeStrategy {
    /// Wire name of the strategy
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferLeft => "prefer_left",
            Self::PreferRight => "prefer_right",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer_left" => Ok(Self::PreferLeft),
            "prefer_right" => Ok(Self::PreferRight),
            other => Err(CoreError::Validation {
                field: "strategy".to_string(),
                reason: format!("must be prefer_left or prefer_right, got {}", other),
            }),
        }
    }
}

/// Internal bookkeeping a replay stamps onto its output.
///
/// Kept as a first-class struct rather than a reserved key inside the
/// caller-visible modifications map, so user-supplied keys cannot collide
/// with it. Serialized under `__system__` for wire compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemMeta {
    /// Sorted ids of steps invalidated by the replay
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidated_step_ids: Vec<String>,
    /// Strategy the replay ran under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ReplayStrategy>,
    /// Owning batch job, once executed inside one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Owning scenario, once executed inside a job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
}

/// Provenance of a trace produced by replay or merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInfo {
    /// Replay mode that produced the trace
    pub strategy: ReplayStrategy,
    /// Pivot step id; empty for merges
    pub modified_step_id: String,
    /// Caller-supplied modification map
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modifications: BTreeMap<String, serde_json::Value>,
    /// Internal bookkeeping
    #[serde(rename = "__system__", skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMeta>,
    /// When the replay/merge was created (ISO-8601 UTC ms)
    pub created_at: String,
    /// Step id to short content-hash signature, for downstream diffing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoints: Option<BTreeMap<String, String>>,
    /// Source trace ids when produced by merge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_from_trace_ids: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReplayStrategy::Hybrid).unwrap(),
            "\"hybrid\""
        );
        assert_eq!(
            serde_json::to_string(&MergeStrategy::PreferRight).unwrap(),
            "\"prefer_right\""
        );
    }

    #[test]
    fn test_merge_strategy_from_str() {
        assert_eq!(
            "prefer_left".parse::<MergeStrategy>().unwrap(),
            MergeStrategy::PreferLeft
        );
        assert!("prefer_up".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_system_meta_serialized_under_reserved_key() {
        let info = ReplayInfo {
            strategy: ReplayStrategy::Hybrid,
            modified_step_id: "s1".to_string(),
            modifications: BTreeMap::new(),
            system: Some(SystemMeta {
                invalidated_step_ids: vec!["s2".to_string()],
                strategy: Some(ReplayStrategy::Hybrid),
                job_id: None,
                scenario_id: None,
            }),
            created_at: "2026-01-27T10:00:00.000Z".to_string(),
            checkpoints: None,
            merged_from_trace_ids: None,
        };

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"__system__\""));
        assert!(json.contains("\"invalidatedStepIds\":[\"s2\"]"));
    }
}
