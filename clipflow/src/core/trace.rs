//! Per-stage execution trace.

use super::StageStatus;
use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Observability record for one stage (or engagement step) of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    /// Stage or step name.
    pub stage: String,
    /// Final status.
    pub status: StageStatus,
    /// When the stage was entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, including backoff sleeps.
    pub duration_ms: f64,
    /// Adapter attempts made.
    pub attempts: u32,
    /// Backoff delays taken between attempts, in milliseconds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delays_ms: Vec<u64>,
    /// Whether the committed output came from fallback content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    /// The failure that ended the stage, or that fallback replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl StageTrace {
    /// Creates a trace for a stage that has not been entered.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::NotStarted,
            started_at: None,
            duration_ms: 0.0,
            attempts: 0,
            delays_ms: Vec::new(),
            degraded: false,
            error: None,
            clock: None,
        }
    }

    /// Moves the trace to `Running` and starts the clock.
    pub fn start(&mut self) {
        self.transition(StageStatus::Running);
        self.started_at = Some(Utc::now());
        self.clock = Some(Instant::now());
    }

    /// Moves the trace to `Succeeded`.
    pub fn succeed(&mut self) {
        self.transition(StageStatus::Succeeded);
        self.stop_clock();
    }

    /// Moves the trace to `Failed` with the given error.
    pub fn fail(&mut self, error: StageError) {
        self.transition(StageStatus::Failed);
        self.error = Some(error);
        self.stop_clock();
    }

    fn transition(&mut self, next: StageStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal stage transition {} -> {next}",
            self.status
        );
        self.status = next;
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        }
    }
}
