//! Single-stage execution: precondition checks, retry, fallback and commit.

use super::retry::{Resolution, RetryPolicy};
use super::spec::StageDescriptor;
use crate::core::{PipelineState, StageOutput, StageTrace};
use crate::errors::StageError;
use crate::events::{names, EventSink};
use crate::stages::RunScope;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The resolved, not yet committed, result of running one stage.
#[derive(Debug)]
pub struct StageAttempt {
    /// The stage trace so far.
    pub trace: StageTrace,
    outcome: AttemptOutcome,
}

#[derive(Debug)]
enum AttemptOutcome {
    Skipped,
    Output(StageOutput),
    Failed(StageError),
}

impl StageAttempt {
    /// Returns true if the stage was not entered because the input state
    /// was already terminal.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Skipped)
    }

    /// Returns the failure, if the stage could not produce output.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        match &self.outcome {
            AttemptOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Runs one named stage against a committed state.
#[derive(Clone)]
pub struct StageExecutor {
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(retry: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self { retry, sink }
    }

    /// Runs the stage and commits its output into a new state.
    ///
    /// A state that already carries an error is returned unchanged with a
    /// `NotStarted` trace.
    pub async fn execute(
        &self,
        descriptor: &StageDescriptor,
        state: &PipelineState,
        scope: &RunScope,
    ) -> (PipelineState, StageTrace) {
        let attempt = self.resolve(descriptor, state, scope).await;
        let (result, trace) = self.commit(descriptor, state, attempt, scope);
        match result {
            Ok(next) => (next, trace),
            Err(err) => (state.fail(err), trace),
        }
    }

    /// Runs the stage without committing anything.
    ///
    /// The stage is entered only if `state` has no error, the run is not
    /// cancelled and every required input is present and non-empty.
    pub async fn resolve(
        &self,
        descriptor: &StageDescriptor,
        state: &PipelineState,
        scope: &RunScope,
    ) -> StageAttempt {
        let name = descriptor.name;
        let mut trace = StageTrace::new(name.as_str());

        if state.is_failed() {
            debug!(stage = %name, "skipping stage, state is terminal");
            return StageAttempt {
                trace,
                outcome: AttemptOutcome::Skipped,
            };
        }

        if let Err(err) = scope.token().check() {
            return self.reject(trace, err.with_stage(name), scope);
        }

        if let Some(field) = state.first_missing(&descriptor.requires) {
            let err = StageError::precondition(format!("missing required input '{field}'"))
                .with_stage(name);
            return self.reject(trace, err, scope);
        }

        trace.start();
        self.sink.try_emit(
            names::STAGE_STARTED,
            Some(json!({"stage": name, "run_id": scope.run_id()})),
        );
        info!(stage = %name, run_id = %scope.run_id(), "stage started");

        let runner = &descriptor.runner;
        let outcome = self
            .retry
            .run(
                scope.token(),
                |attempt| {
                    let ctx = scope.stage_context(name, attempt);
                    async move { runner.execute(state, &ctx).await }
                },
                |cause| {
                    if !descriptor.degrades() {
                        return None;
                    }
                    warn!(stage = %name, error = %cause, "using fallback content");
                    runner.fallback(state).map(StageOutput::degraded)
                },
            )
            .await;

        trace.attempts = outcome.attempts;
        trace.delays_ms = outcome.delays_ms();

        let outcome = match outcome.resolution {
            Resolution::Primary(output) => AttemptOutcome::Output(output),
            Resolution::Degraded { value, cause } => {
                trace.degraded = true;
                trace.error = Some(cause.with_stage(name));
                AttemptOutcome::Output(value)
            }
            Resolution::Failed(err) => {
                let err = err.with_stage(name);
                self.fail_trace(&mut trace, err.clone(), scope);
                AttemptOutcome::Failed(err)
            }
        };

        StageAttempt { trace, outcome }
    }

    /// Commits a resolved attempt onto `state`.
    ///
    /// Returns the new state, or the error the run must terminate with.
    ///
    /// # Errors
    ///
    /// Returns the stage failure, or the `Conflict`/`Permanent` error raised
    /// when the output does not match the descriptor.
    pub fn commit(
        &self,
        descriptor: &StageDescriptor,
        state: &PipelineState,
        attempt: StageAttempt,
        scope: &RunScope,
    ) -> (Result<PipelineState, StageError>, StageTrace) {
        let StageAttempt { mut trace, outcome } = attempt;
        let name = descriptor.name;

        let output = match outcome {
            AttemptOutcome::Skipped => return (Ok(state.clone()), trace),
            AttemptOutcome::Failed(err) => return (Err(err), trace),
            AttemptOutcome::Output(output) => output,
        };

        match state.apply(name, &descriptor.produces, output) {
            Ok(next) => {
                trace.succeed();
                let event = if trace.degraded {
                    names::STAGE_DEGRADED
                } else {
                    names::STAGE_COMPLETED
                };
                self.sink.try_emit(
                    event,
                    Some(json!({
                        "stage": name,
                        "run_id": scope.run_id(),
                        "attempts": trace.attempts,
                        "duration_ms": trace.duration_ms,
                    })),
                );
                info!(
                    stage = %name,
                    attempts = trace.attempts,
                    degraded = trace.degraded,
                    duration_ms = trace.duration_ms,
                    "stage completed"
                );
                (Ok(next), trace)
            }
            Err(err) => {
                let err = err.with_stage(name);
                self.fail_trace(&mut trace, err.clone(), scope);
                (Err(err), trace)
            }
        }
    }

    fn reject(&self, mut trace: StageTrace, err: StageError, scope: &RunScope) -> StageAttempt {
        self.fail_trace(&mut trace, err.clone(), scope);
        StageAttempt {
            trace,
            outcome: AttemptOutcome::Failed(err),
        }
    }

    fn fail_trace(&self, trace: &mut StageTrace, err: StageError, scope: &RunScope) {
        warn!(stage = %trace.stage, error = %err, "stage failed");
        self.sink.try_emit(
            names::STAGE_FAILED,
            Some(json!({
                "stage": trace.stage,
                "run_id": scope.run_id(),
                "error": err.to_dict(),
            })),
        );
        trace.fail(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::core::{StageName, StageStatus, StateField};
    use crate::errors::ErrorKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Recovery, RetryConfig};
    use crate::testing::RecordingStage;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn executor(sink: Arc<CollectingEventSink>) -> StageExecutor {
        StageExecutor::new(
            RetryPolicy::new(RetryConfig::new().with_base_delay_ms(1)),
            sink,
        )
    }

    fn scope() -> RunScope {
        RunScope::at(Uuid::nil(), "/tmp/clipflow-test", CancellationToken::new())
    }

    fn voice(stage: RecordingStage) -> StageDescriptor {
        StageDescriptor::new(Arc::new(stage))
            .requires([StateField::Script])
            .produces([StateField::AudioPath])
    }

    fn scripted_state() -> PipelineState {
        PipelineState::new("cats")
            .apply(
                StageName::Content,
                &[StateField::Script],
                StageOutput::new().with_script("Cats are liquid."),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_state_returned_unchanged() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .with_output(StageOutput::new().with_audio_path("a.mp3"));
        let calls = stage.calls();
        let state = scripted_state().fail(StageError::permanent("earlier"));

        let (next, trace) = executor(sink.clone()).execute(&voice(stage), &state, &scope()).await;

        assert_eq!(next, state);
        assert_eq!(trace.status, StageStatus::NotStarted);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_is_precondition() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .with_output(StageOutput::new().with_audio_path("a.mp3"));
        let calls = stage.calls();
        let state = PipelineState::new("cats");

        let (next, trace) = executor(sink.clone()).execute(&voice(stage), &state, &scope()).await;

        let err = next.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.message, "missing required input 'script'");
        assert_eq!(err.stage, Some(StageName::Voice));
        assert_eq!(next.topic(), Some("cats"));
        assert!(next.audio_path().is_none());
        assert_eq!(trace.status, StageStatus::Failed);
        assert_eq!(trace.attempts, 0);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(sink.event_types(), vec!["stage.failed"]);
    }

    #[tokio::test]
    async fn test_success_commits_and_leaves_input_untouched() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .with_output(StageOutput::new().with_audio_path("a.mp3"));
        let state = scripted_state();

        let (next, trace) = executor(sink.clone()).execute(&voice(stage), &state, &scope()).await;

        assert!(state.audio_path().is_none());
        assert_eq!(next.audio_path(), Some(std::path::Path::new("a.mp3")));
        assert_eq!(next.current_step(), Some(StageName::Voice));
        assert_eq!(trace.status, StageStatus::Succeeded);
        assert_eq!(trace.attempts, 1);
        assert_eq!(sink.event_types(), vec!["stage.started", "stage.completed"]);
    }

    #[tokio::test]
    async fn test_undeclared_write_is_conflict() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice).with_output(
            StageOutput::new()
                .with_audio_path("a.mp3")
                .with_video_path("v.mp4"),
        );

        let (next, trace) = executor(sink).execute(&voice(stage), &scripted_state(), &scope()).await;

        assert_eq!(next.error().unwrap().kind, ErrorKind::Conflict);
        assert_eq!(trace.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_declared_output_is_permanent() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice).with_output(StageOutput::new());

        let (next, _) = executor(sink).execute(&voice(stage), &scripted_state(), &scope()).await;

        assert_eq!(next.error().unwrap().kind, ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_degrade_uses_fallback() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .failing_with(StageError::configuration("no tts binary"))
            .with_fallback(StageOutput::new().with_audio_path("silence.mp3"));
        let descriptor = voice(stage).with_recovery(Recovery::Degrade);

        let (next, trace) = executor(sink.clone()).execute(&descriptor, &scripted_state(), &scope()).await;

        assert!(!next.is_failed());
        assert_eq!(next.degraded_stages(), &[StageName::Voice]);
        assert!(trace.degraded);
        assert_eq!(trace.error.as_ref().unwrap().kind, ErrorKind::Configuration);
        assert_eq!(trace.status, StageStatus::Succeeded);
        assert_eq!(sink.event_types(), vec!["stage.started", "stage.degraded"]);
    }

    #[tokio::test]
    async fn test_propagate_ignores_fallback() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .failing_with(StageError::permanent("bad voice id"))
            .with_fallback(StageOutput::new().with_audio_path("silence.mp3"));

        let (next, trace) = executor(sink).execute(&voice(stage), &scripted_state(), &scope()).await;

        let err = next.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert_eq!(err.message, "bad voice id");
        assert_eq!(trace.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_enter_stage() {
        let sink = Arc::new(CollectingEventSink::new());
        let stage = RecordingStage::new(StageName::Voice)
            .with_output(StageOutput::new().with_audio_path("a.mp3"));
        let calls = stage.calls();
        let scope = scope();
        scope.token().cancel("user abort");

        let (next, trace) = executor(sink).execute(&voice(stage), &scripted_state(), &scope).await;

        assert_eq!(next.error().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(trace.status, StageStatus::Failed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
