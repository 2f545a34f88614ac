//! Fail-fast pipeline runner.

use super::executor::StageExecutor;
use super::spec::StageGroup;
use crate::core::{PipelineState, StageName, StageTrace};
use crate::errors::StageError;
use crate::events::{names, EventSink};
use crate::stages::RunScope;
use crate::utils::Timestamp;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Final state and per-stage trace of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The pipeline name.
    pub pipeline: String,
    /// The final state.
    pub state: PipelineState,
    /// One entry per stage, in descriptor order.
    pub trace: Vec<StageTrace>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if the final state carries no error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.state.is_failed()
    }

    /// Returns the terminal error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.state.error()
    }

    /// Returns the trace entry for `stage`.
    #[must_use]
    pub fn trace_for(&self, stage: StageName) -> Option<&StageTrace> {
        self.trace.iter().find(|t| t.stage == stage.as_str())
    }
}

/// Owns an ordered, validated list of stage groups and drives a run.
///
/// Built by [`super::PipelineBuilder`].
#[derive(Clone)]
pub struct PipelineRunner {
    name: String,
    groups: Vec<StageGroup>,
    executor: StageExecutor,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    pub(crate) fn new(
        name: String,
        groups: Vec<StageGroup>,
        executor: StageExecutor,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name,
            groups,
            executor,
            sink,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every stage name in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.groups.iter().flat_map(StageGroup::names).collect()
    }

    /// Returns the number of execution groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Runs every stage against `initial`.
    ///
    /// Never fails: stage failures end up in the returned state, and stages
    /// after the first failure are listed as `NotStarted`.
    pub async fn run(&self, initial: PipelineState, scope: &RunScope) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = scope.run_id();

        self.sink.try_emit(
            names::PIPELINE_STARTED,
            Some(json!({
                "pipeline": self.name,
                "run_id": run_id,
                "stages": self.stage_names(),
            })),
        );
        info!(pipeline = %self.name, run_id = %run_id, "pipeline started");

        let mut state = initial.with_run_id(run_id);
        let mut trace = Vec::with_capacity(self.groups.iter().map(|g| g.members.len()).sum());

        for group in &self.groups {
            if state.is_failed() {
                trace.extend(group.members.iter().map(|d| StageTrace::new(d.name.as_str())));
                continue;
            }
            if let Err(cancelled) = scope.token().check() {
                let first = group.members.first().map(|d| d.name);
                state = state.fail(match first {
                    Some(stage) => cancelled.with_stage(stage),
                    None => cancelled,
                });
                trace.extend(group.members.iter().map(|d| StageTrace::new(d.name.as_str())));
                continue;
            }

            if group.is_concurrent() {
                state = self.run_group(group, state, scope, &mut trace).await;
            } else {
                for descriptor in &group.members {
                    let (next, stage_trace) = self.executor.execute(descriptor, &state, scope).await;
                    state = next;
                    trace.push(stage_trace);
                }
            }
        }

        let finished_at = Utc::now();
        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;

        match state.error() {
            None => {
                self.sink.try_emit(
                    names::PIPELINE_COMPLETED,
                    Some(json!({
                        "pipeline": self.name,
                        "run_id": run_id,
                        "duration_ms": duration_ms,
                        "degraded": state.degraded_stages(),
                    })),
                );
                info!(pipeline = %self.name, run_id = %run_id, duration_ms, "pipeline completed");
            }
            Some(err) => {
                self.sink.try_emit(
                    names::PIPELINE_FAILED,
                    Some(json!({
                        "pipeline": self.name,
                        "run_id": run_id,
                        "duration_ms": duration_ms,
                        "error": err.to_dict(),
                    })),
                );
                error!(pipeline = %self.name, run_id = %run_id, error = %err, "pipeline failed");
            }
        }

        RunReport {
            pipeline: self.name.clone(),
            state,
            trace,
            started_at,
            finished_at,
            duration_ms,
        }
    }

    /// Runs a concurrent group from one base state and merges the results
    /// in descriptor order, so the outcome does not depend on scheduling.
    async fn run_group(
        &self,
        group: &StageGroup,
        base: PipelineState,
        scope: &RunScope,
        trace: &mut Vec<StageTrace>,
    ) -> PipelineState {
        let attempts = join_all(
            group
                .members
                .iter()
                .map(|descriptor| self.executor.resolve(descriptor, &base, scope)),
        )
        .await;

        let mut state = base.clone();
        let mut first_error: Option<StageError> = None;

        for (descriptor, attempt) in group.members.iter().zip(attempts) {
            let (result, stage_trace) = self.executor.commit(descriptor, &state, attempt, scope);
            trace.push(stage_trace);
            match result {
                Ok(next) => state = next,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => state.fail(err),
            None => state,
        }
    }
}
