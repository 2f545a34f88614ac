//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{PipelineState, StageName, StageOutput};
use crate::errors::StageError;
use crate::stages::{Stage, StageContext};

/// A stage with scripted behavior that counts its calls and records the
/// state it was given.
#[derive(Debug, Clone)]
pub struct RecordingStage {
    name: StageName,
    output: StageOutput,
    error: Option<StageError>,
    failures_left: Option<Arc<AtomicUsize>>,
    fallback: Option<StageOutput>,
    max_delay_ms: u64,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<PipelineState>>>,
}

impl RecordingStage {
    /// Creates a stage that returns an empty output.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            output: StageOutput::new(),
            error: None,
            failures_left: None,
            fallback: None,
            max_delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the output returned on success.
    #[must_use]
    pub fn with_output(mut self, output: StageOutput) -> Self {
        self.output = output;
        self
    }

    /// Fails every attempt with `error`.
    #[must_use]
    pub fn failing_with(mut self, error: StageError) -> Self {
        self.error = Some(error);
        self.failures_left = None;
        self
    }

    /// Fails the first `times` attempts with `error`, then succeeds.
    #[must_use]
    pub fn failing_times(mut self, times: usize, error: StageError) -> Self {
        self.error = Some(error);
        self.failures_left = Some(Arc::new(AtomicUsize::new(times)));
        self
    }

    /// Sets the fallback output.
    #[must_use]
    pub fn with_fallback(mut self, output: StageOutput) -> Self {
        self.fallback = Some(output);
        self
    }

    /// Sleeps a random duration up to `max_ms` before each attempt.
    #[must_use]
    pub fn with_random_delay(mut self, max_ms: u64) -> Self {
        self.max_delay_ms = max_ms;
        self
    }

    /// Returns the shared call counter.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Returns the shared log of states the stage executed against.
    #[must_use]
    pub fn seen_states(&self) -> Arc<Mutex<Vec<PipelineState>>> {
        Arc::clone(&self.seen)
    }

    fn next_error(&self) -> Option<StageError> {
        let error = self.error.as_ref()?;
        match &self.failures_left {
            None => Some(error.clone()),
            Some(left) => left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()
                .map(|_| error.clone()),
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn execute(
        &self,
        state: &PipelineState,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(state.clone());

        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match self.next_error() {
            Some(err) => Err(err),
            None => Ok(self.output.clone()),
        }
    }

    fn fallback(&self, _state: &PipelineState) -> Option<StageOutput> {
        self.fallback.clone()
    }
}
