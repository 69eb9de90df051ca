//! In-process orchestrator for batch replay jobs.
//!
//! State lives behind one mutex; every public method takes `&self` and
//! holds the lock only while mutating bookkeeping, never across a store
//! or engine call. Scenarios run strictly in submission order.

use crate::job::{ReplayJob, ReplayScenario, RunState, ScenarioSpec};
use crate::matrix::{self, TraceMatrix};
use chrono::Utc;
use indexmap::IndexMap;
use retrace_core::{CoreError, CoreResult, iso};
use retrace_model::{ReplayStrategy, TraceStore};
use retrace_replay::ReplayEngine;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Upper bound on scenarios in one job
pub const MAX_SCENARIOS_PER_JOB: usize = 25;

/// Store save attempts per scenario
const SCENARIO_ATTEMPTS: usize = 2;

#[derive(Default)]
struct OrchestratorState {
    jobs: IndexMap<String, ReplayJob>,
    matrix_cache: HashMap<String, TraceMatrix>,
}

/// Tracks replay jobs through their lifecycle and runs their scenarios
pub struct JobOrchestrator {
    inner: Mutex<OrchestratorState>,
}

impl JobOrchestrator {
    /// Create an empty orchestrator
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(OrchestratorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a queued job from caller-supplied scenario specs.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for empty ids, an empty spec list,
    /// or a spec requesting the merge strategy, and
    /// `CoreError::CapacityExceeded` when more than
    /// `MAX_SCENARIOS_PER_JOB` scenarios are requested
    pub fn create_job(
        &self,
        trace_id: &str,
        step_id: &str,
        specs: &[ScenarioSpec],
    ) -> CoreResult<ReplayJob> {
        if trace_id.trim().is_empty() {
            return Err(CoreError::Validation {
                field: "trace_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if step_id.trim().is_empty() {
            return Err(CoreError::Validation {
                field: "step_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if specs.is_empty() {
            return Err(CoreError::Validation {
                field: "scenarios".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if specs.len() > MAX_SCENARIOS_PER_JOB {
            return Err(CoreError::CapacityExceeded {
                resource: "scenarios".to_string(),
                limit: MAX_SCENARIOS_PER_JOB as u64,
            });
        }

        let mut scenarios = Vec::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            let strategy = spec.strategy.unwrap_or(ReplayStrategy::Hybrid);
            if strategy == ReplayStrategy::Merge {
                return Err(CoreError::Validation {
                    field: "strategy".to_string(),
                    reason: "merge traces are produced by the merge operation, not replay"
                        .to_string(),
                });
            }
            scenarios.push(ReplayScenario {
                id: format!("scn-{}", short_uuid()),
                name: spec
                    .name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| format!("Scenario {}", position + 1)),
                strategy,
                modifications: spec.modifications.clone(),
                status: RunState::Queued,
                started_at: None,
                ended_at: None,
                replay_trace_id: None,
                error: None,
            });
        }

        let job = ReplayJob {
            id: format!("job-{}", short_uuid()),
            trace_id: trace_id.to_string(),
            step_id: step_id.to_string(),
            scenarios,
            status: RunState::Queued,
            created_at: now_iso(),
            started_at: None,
            ended_at: None,
        };
        info!(
            job_id = %job.id,
            trace_id = %job.trace_id,
            scenarios = job.scenarios.len(),
            "replay job created"
        );
        self.state().jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Fetch a job snapshot by id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown ids
    pub fn get_job(&self, job_id: &str) -> CoreResult<ReplayJob> {
        self.state()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                kind: "ReplayJob".to_string(),
                id: job_id.to_string(),
            })
    }

    /// Claim the next queued scenario, marking it and the job running.
    ///
    /// Returns `None` when the job is unknown, already terminal, or has
    /// no queued scenario left.
    pub fn start_next_scenario(&self, job_id: &str) -> Option<ReplayScenario> {
        let mut state = self.state();
        let job = state.jobs.get_mut(job_id)?;
        if job.status.is_final() {
            return None;
        }

        let now = now_iso();
        let next = job
            .scenarios
            .iter_mut()
            .find(|scenario| scenario.status == RunState::Queued);
        let Some(scenario) = next else {
            refresh_job_status(job);
            return None;
        };

        scenario.status = RunState::Running;
        scenario.started_at = Some(now.clone());
        let claimed = scenario.clone();
        job.status = RunState::Running;
        job.started_at.get_or_insert(now);
        debug!(job_id = %job_id, scenario_id = %claimed.id, "scenario started");
        Some(claimed)
    }

    /// Record a scenario's successful completion.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown job or scenario ids
    pub fn complete_scenario(
        &self,
        job_id: &str,
        scenario_id: &str,
        replay_trace_id: &str,
    ) -> CoreResult<()> {
        self.finish_scenario(job_id, scenario_id, |scenario| {
            scenario.status = RunState::Completed;
            scenario.replay_trace_id = Some(replay_trace_id.to_string());
            scenario.error = None;
        })
    }

    /// Record a scenario's failure.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown job or scenario ids
    pub fn fail_scenario(&self, job_id: &str, scenario_id: &str, error: &str) -> CoreResult<()> {
        self.finish_scenario(job_id, scenario_id, |scenario| {
            scenario.status = RunState::Failed;
            scenario.error = Some(error.to_string());
        })
    }

    fn finish_scenario(
        &self,
        job_id: &str,
        scenario_id: &str,
        apply: impl FnOnce(&mut ReplayScenario),
    ) -> CoreResult<()> {
        let mut state = self.state();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| CoreError::NotFound {
            kind: "ReplayJob".to_string(),
            id: job_id.to_string(),
        })?;
        let scenario = job
            .scenarios
            .iter_mut()
            .find(|scenario| scenario.id == scenario_id)
            .ok_or_else(|| CoreError::NotFound {
                kind: "ReplayScenario".to_string(),
                id: scenario_id.to_string(),
            })?;
        if scenario.status.is_final() {
            return Ok(());
        }
        apply(scenario);
        scenario.ended_at = Some(now_iso());
        refresh_job_status(job);
        state.matrix_cache.remove(job_id);
        Ok(())
    }

    /// Fail every non-terminal scenario with one shared reason. Used when
    /// the job cannot run at all, e.g. the base trace is gone.
    fn fail_remaining_scenarios(&self, job_id: &str, reason: &str) -> CoreResult<()> {
        let mut state = self.state();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| CoreError::NotFound {
            kind: "ReplayJob".to_string(),
            id: job_id.to_string(),
        })?;
        if job.status.is_final() {
            return Ok(());
        }

        let now = now_iso();
        for scenario in &mut job.scenarios {
            if !scenario.status.is_final() {
                scenario.status = RunState::Failed;
                scenario.error = Some(reason.to_string());
                scenario.started_at.get_or_insert(now.clone());
                scenario.ended_at = Some(now.clone());
            }
        }
        refresh_job_status(job);
        state.matrix_cache.remove(job_id);
        Ok(())
    }

    /// Cancel a job, marking every non-terminal scenario canceled.
    ///
    /// Cancelling an already-terminal job is a no-op returning the job
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown ids
    pub fn cancel_job(&self, job_id: &str) -> CoreResult<ReplayJob> {
        let mut state = self.state();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| CoreError::NotFound {
            kind: "ReplayJob".to_string(),
            id: job_id.to_string(),
        })?;
        if job.status.is_final() {
            return Ok(job.clone());
        }

        let now = now_iso();
        for scenario in &mut job.scenarios {
            if !scenario.status.is_final() {
                scenario.status = RunState::Canceled;
                scenario.started_at.get_or_insert(now.clone());
                scenario.ended_at = Some(now.clone());
            }
        }
        job.status = RunState::Canceled;
        job.started_at.get_or_insert(now.clone());
        job.ended_at = Some(now);
        let snapshot = job.clone();
        state.matrix_cache.remove(job_id);
        info!(job_id = %job_id, "replay job canceled");
        Ok(snapshot)
    }

    /// Run every queued scenario of a job to completion, in order.
    ///
    /// Scenario failures are recorded on the scenario and do not abort
    /// the remaining scenarios. A missing base trace fails the whole job.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown job ids, or a store
    /// error while loading the base trace
    pub fn execute_job(&self, job_id: &str, store: &dyn TraceStore) -> CoreResult<ReplayJob> {
        let job = self.get_job(job_id)?;

        let base = match store.get_trace(&job.trace_id) {
            Ok(trace) => trace,
            Err(CoreError::NotFound { .. }) => {
                let reason = format!("base trace not found: {}", job.trace_id);
                self.fail_remaining_scenarios(job_id, &reason)?;
                return self.get_job(job_id);
            }
            Err(err) => return Err(err),
        };

        let engine = ReplayEngine::new();
        while let Some(scenario) = self.start_next_scenario(job_id) {
            let mut last_error = String::new();
            let mut done = false;
            for _attempt in 0..SCENARIO_ATTEMPTS {
                match run_scenario(&engine, &base, &job, &scenario, store) {
                    Ok(replay_trace_id) => {
                        self.complete_scenario(job_id, &scenario.id, &replay_trace_id)?;
                        done = true;
                        break;
                    }
                    Err(err) => last_error = err.to_string(),
                }
            }
            if !done {
                debug!(
                    job_id = %job_id,
                    scenario_id = %scenario.id,
                    error = %last_error,
                    "scenario failed"
                );
                self.fail_scenario(job_id, &scenario.id, &last_error)?;
            }
        }

        self.get_job(job_id)
    }

    /// Build (or fetch from cache) the metrics matrix for a job.
    ///
    /// Only terminal jobs are cached; a running job's matrix is rebuilt
    /// on every call so it reflects scenario progress.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown jobs or missing traces
    pub fn matrix(&self, job_id: &str, store: &dyn TraceStore) -> CoreResult<TraceMatrix> {
        if let Some(cached) = self.state().matrix_cache.get(job_id) {
            return Ok(cached.clone());
        }

        let job = self.get_job(job_id)?;
        let matrix = matrix::build_matrix(&job, store)?;
        if job.status.is_final() {
            self.state()
                .matrix_cache
                .insert(job_id.to_string(), matrix.clone());
        }
        Ok(matrix)
    }
}

impl Default for JobOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn run_scenario(
    engine: &ReplayEngine,
    base: &retrace_model::Trace,
    job: &ReplayJob,
    scenario: &ReplayScenario,
    store: &dyn TraceStore,
) -> CoreResult<String> {
    let mut replayed = engine.replay(base, &job.step_id, scenario.strategy, &scenario.modifications)?;
    replayed.name = format!("{} ({})", base.name, scenario.name);
    if let Some(replay) = replayed.replay.as_mut() {
        let system = replay.system.get_or_insert_with(Default::default);
        system.job_id = Some(job.id.clone());
        system.scenario_id = Some(scenario.id.clone());
    }
    store.save_trace(&replayed)?;
    Ok(replayed.id)
}

/// Recompute the aggregate job status from its scenarios.
///
/// A failed scenario takes precedence over queued or running siblings:
/// the job goes terminal immediately and no further scenario is claimed.
fn refresh_job_status(job: &mut ReplayJob) {
    let statuses: Vec<RunState> = job.scenarios.iter().map(|scenario| scenario.status).collect();

    let next = if statuses.iter().all(|status| *status == RunState::Completed) {
        RunState::Completed
    } else if statuses.iter().any(|status| *status == RunState::Failed) {
        RunState::Failed
    } else if statuses.iter().any(|status| *status == RunState::Running) {
        RunState::Running
    } else if statuses.iter().all(|status| *status == RunState::Canceled) {
        RunState::Canceled
    } else {
        RunState::Queued
    };

    job.status = next;
    if next.is_final() && job.ended_at.is_none() {
        let now = now_iso();
        job.started_at.get_or_insert(now.clone());
        job.ended_at = Some(now);
    }
}

fn now_iso() -> String {
    iso::format(Utc::now())
}

fn short_uuid() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn specs(n: usize) -> Vec<ScenarioSpec> {
        (0..n).map(|_| ScenarioSpec::default()).collect()
    }

    #[test]
    fn test_create_job_defaults() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(2))
            .unwrap();

        assert!(job.id.starts_with("job-"));
        assert_eq!(job.status, RunState::Queued);
        assert_eq!(job.scenarios.len(), 2);
        assert_eq!(job.scenarios[0].name, "Scenario 1");
        assert_eq!(job.scenarios[1].name, "Scenario 2");
        assert_eq!(job.scenarios[0].strategy, ReplayStrategy::Hybrid);
        assert!(job.scenarios[0].id.starts_with("scn-"));
    }

    #[test]
    fn test_create_job_rejects_empty_inputs() {
        let orchestrator = JobOrchestrator::new();
        assert!(orchestrator.create_job("", "step-1", &specs(1)).is_err());
        assert!(orchestrator.create_job("trace-1", " ", &specs(1)).is_err());
        assert!(orchestrator.create_job("trace-1", "step-1", &[]).is_err());
    }

    #[test]
    fn test_create_job_enforces_capacity() {
        let orchestrator = JobOrchestrator::new();
        let err = orchestrator
            .create_job("trace-1", "step-1", &specs(MAX_SCENARIOS_PER_JOB + 1))
            .unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { .. }));

        assert!(
            orchestrator
                .create_job("trace-1", "step-1", &specs(MAX_SCENARIOS_PER_JOB))
                .is_ok()
        );
    }

    #[test]
    fn test_create_job_rejects_merge_strategy() {
        let orchestrator = JobOrchestrator::new();
        let spec = ScenarioSpec {
            strategy: Some(ReplayStrategy::Merge),
            ..ScenarioSpec::default()
        };
        let err = orchestrator
            .create_job("trace-1", "step-1", &[spec])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_start_next_claims_in_submission_order() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(2))
            .unwrap();

        let first = orchestrator.start_next_scenario(&job.id).unwrap();
        assert_eq!(first.id, job.scenarios[0].id);
        assert_eq!(first.status, RunState::Running);

        let running = orchestrator.get_job(&job.id).unwrap();
        assert_eq!(running.status, RunState::Running);
        assert!(running.started_at.is_some());

        let second = orchestrator.start_next_scenario(&job.id).unwrap();
        assert_eq!(second.id, job.scenarios[1].id);
    }

    #[test]
    fn test_complete_all_scenarios_completes_job() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(2))
            .unwrap();

        for _ in 0..2 {
            let scenario = orchestrator.start_next_scenario(&job.id).unwrap();
            orchestrator
                .complete_scenario(&job.id, &scenario.id, "replay-x")
                .unwrap();
        }

        let done = orchestrator.get_job(&job.id).unwrap();
        assert_eq!(done.status, RunState::Completed);
        assert!(done.ended_at.is_some());
        assert!(orchestrator.start_next_scenario(&job.id).is_none());
    }

    #[test]
    fn test_failed_scenario_fails_job_and_stops_queued_siblings() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(2))
            .unwrap();

        let first = orchestrator.start_next_scenario(&job.id).unwrap();
        orchestrator
            .fail_scenario(&job.id, &first.id, "engine exploded")
            .unwrap();

        // Failure takes precedence over the queued sibling; the job is
        // terminal and nothing further can be claimed.
        let done = orchestrator.get_job(&job.id).unwrap();
        assert_eq!(done.status, RunState::Failed);
        assert!(done.ended_at.is_some());
        assert_eq!(
            done.scenarios[0].error.as_deref(),
            Some("engine exploded")
        );
        assert_eq!(done.scenarios[1].status, RunState::Queued);
        assert!(orchestrator.start_next_scenario(&job.id).is_none());
    }

    #[test]
    fn test_cancel_marks_pending_scenarios() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(3))
            .unwrap();

        let first = orchestrator.start_next_scenario(&job.id).unwrap();
        orchestrator
            .complete_scenario(&job.id, &first.id, "replay-x")
            .unwrap();

        let canceled = orchestrator.cancel_job(&job.id).unwrap();
        assert_eq!(canceled.status, RunState::Canceled);
        assert_eq!(canceled.scenarios[0].status, RunState::Completed);
        assert_eq!(canceled.scenarios[1].status, RunState::Canceled);
        assert_eq!(canceled.scenarios[2].status, RunState::Canceled);
        assert!(canceled.scenarios[1].ended_at.is_some());

        // Terminal scenarios are claimed by nobody afterwards.
        assert!(orchestrator.start_next_scenario(&job.id).is_none());
    }

    #[test]
    fn test_cancel_terminal_job_is_noop() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(1))
            .unwrap();
        let scenario = orchestrator.start_next_scenario(&job.id).unwrap();
        orchestrator
            .complete_scenario(&job.id, &scenario.id, "replay-x")
            .unwrap();

        let after = orchestrator.cancel_job(&job.id).unwrap();
        assert_eq!(after.status, RunState::Completed);
    }

    #[test]
    fn test_get_job_unknown_id() {
        let orchestrator = JobOrchestrator::new();
        assert!(matches!(
            orchestrator.get_job("job-missing"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_finish_terminal_scenario_is_noop() {
        let orchestrator = JobOrchestrator::new();
        let job = orchestrator
            .create_job("trace-1", "step-1", &specs(1))
            .unwrap();
        let scenario = orchestrator.start_next_scenario(&job.id).unwrap();
        orchestrator
            .complete_scenario(&job.id, &scenario.id, "replay-x")
            .unwrap();
        orchestrator
            .fail_scenario(&job.id, &scenario.id, "late failure")
            .unwrap();

        let done = orchestrator.get_job(&job.id).unwrap();
        assert_eq!(done.scenarios[0].status, RunState::Completed);
        assert!(done.scenarios[0].error.is_none());
    }

    #[test]
    fn test_modifications_carried_onto_scenario() {
        let orchestrator = JobOrchestrator::new();
        let mut modifications = BTreeMap::new();
        modifications.insert("prompt".to_string(), json!("shorter"));
        let spec = ScenarioSpec {
            name: Some("short prompt".to_string()),
            strategy: Some(ReplayStrategy::Live),
            modifications,
        };

        let job = orchestrator.create_job("trace-1", "step-1", &[spec]).unwrap();
        assert_eq!(job.scenarios[0].name, "short prompt");
        assert_eq!(job.scenarios[0].strategy, ReplayStrategy::Live);
        assert_eq!(job.scenarios[0].modifications["prompt"], "shorter");
    }
}
