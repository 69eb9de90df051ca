//! RETRACE replay job orchestration
//!
//! Runs batches of what-if replay scenarios against a base trace,
//! builds a per-scenario metrics matrix via the diff component, and
//! ranks which modification factors best explain outcome deltas.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod job;
pub mod matrix;
pub mod orchestrator;
pub mod service;

pub use job::{ReplayJob, ReplayScenario, RunState, ScenarioSpec};
pub use matrix::{
    CausalFactor, FactorEvidence, MatrixRow, RowMetrics, TraceMatrix, build_matrix, rank_factors,
};
pub use orchestrator::{JobOrchestrator, MAX_SCENARIOS_PER_JOB};
pub use service::ReplayService;
