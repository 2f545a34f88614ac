//! End-to-end tests for pipeline execution.

use crate::adapters::GeneratedContent;
use crate::cancellation::CancellationToken;
use crate::core::{PipelineState, StageName, StageOutput, StageStatus, StateField};
use crate::errors::{ErrorKind, StageError};
use crate::events::{names, CollectingEventSink};
use crate::pipeline::{PipelineBuilder, PipelineRunner, Recovery, RetryConfig, StageDescriptor};
use crate::stages::{ContentStage, RunScope, VoiceStage};
use crate::testing::{
    assert_run_failed_at, assert_run_succeeded, assert_stage_degraded, assert_stage_status,
    assert_trace_order, FakeSpeechSynthesizer, RecordingStage, ScriptedContentGenerator,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

fn scope(token: CancellationToken) -> RunScope {
    RunScope::at(Uuid::new_v4(), std::env::temp_dir().join("clipflow-tests"), token)
}

fn content_stage(stage: RecordingStage) -> StageDescriptor {
    StageDescriptor::new(Arc::new(stage))
        .requires([StateField::Topic])
        .produces([StateField::Script])
        .with_recovery(Recovery::Degrade)
}

fn voice_stage(stage: RecordingStage) -> StageDescriptor {
    StageDescriptor::new(Arc::new(stage))
        .requires([StateField::Script])
        .produces([StateField::AudioPath])
}

fn visual_stage(stage: RecordingStage) -> StageDescriptor {
    StageDescriptor::new(Arc::new(stage))
        .requires([StateField::Topic])
        .produces([StateField::ImagePath])
        .independent()
}

fn animation_stage(stage: RecordingStage) -> StageDescriptor {
    StageDescriptor::new(Arc::new(stage))
        .requires([StateField::AudioPath, StateField::ImagePath])
        .produces([StateField::VideoPath])
}

fn script() -> RecordingStage {
    RecordingStage::new(StageName::Content).with_output(StageOutput::new().with_script("Cats are liquid."))
}

fn audio() -> RecordingStage {
    RecordingStage::new(StageName::Voice).with_output(StageOutput::new().with_audio_path("voice.mp3"))
}

fn image() -> RecordingStage {
    RecordingStage::new(StageName::Visual).with_output(StageOutput::new().with_image_path("face.png"))
}

fn video() -> RecordingStage {
    RecordingStage::new(StageName::Animation).with_output(StageOutput::new().with_video_path("out.mp4"))
}

fn runner(stages: impl IntoIterator<Item = StageDescriptor>) -> PipelineRunner {
    stages
        .into_iter()
        .fold(
            PipelineBuilder::new("content").with_initial_fields([StateField::Topic]),
            PipelineBuilder::stage,
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_full_run_commits_every_stage() {
    let sink = Arc::new(CollectingEventSink::new());
    let runner = PipelineBuilder::new("content")
        .with_initial_fields([StateField::Topic])
        .with_event_sink(sink.clone())
        .stage(content_stage(script()))
        .stage(voice_stage(audio()))
        .stage(visual_stage(image()))
        .stage(animation_stage(video()))
        .build()
        .unwrap();

    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_succeeded(&report);
    assert_trace_order(
        &report,
        &[StageName::Content, StageName::Voice, StageName::Visual, StageName::Animation],
    );
    assert_eq!(report.state.current_step(), Some(StageName::Animation));
    assert_eq!(report.state.video_path().unwrap().to_str(), Some("out.mp4"));

    let types = sink.event_types();
    assert_eq!(types.first().map(String::as_str), Some(names::PIPELINE_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(names::PIPELINE_COMPLETED));
}

#[tokio::test]
async fn test_stages_after_failure_never_run() {
    let animation = video();
    let calls = animation.calls();
    let runner = runner([
        content_stage(script()),
        voice_stage(RecordingStage::new(StageName::Voice).failing_with(StageError::configuration("edge-tts not found"))),
        visual_stage(image()),
        animation_stage(animation),
    ]);

    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_failed_at(&report, StageName::Voice, ErrorKind::Configuration);
    assert_stage_status(&report, StageName::Animation, StageStatus::NotStarted);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.state.script(), Some("Cats are liquid."));
}

#[tokio::test]
async fn test_missing_input_fails_without_entering_stage() {
    let voice = audio();
    let calls = voice.calls();
    let runner = PipelineBuilder::new("resume")
        .with_initial_fields([StateField::Topic, StateField::Script])
        .stage(voice_stage(voice))
        .build()
        .unwrap();

    // Script is declared up front but never set.
    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_failed_at(&report, StageName::Voice, ErrorKind::Precondition);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_succeed() {
    let voice = audio().failing_times(2, StageError::transient("429 from edge-tts"));
    let calls = voice.calls();
    let runner = runner([content_stage(script()), voice_stage(voice)]);

    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_succeeded(&report);
    let trace = report.trace_for(StageName::Voice).unwrap();
    assert_eq!(trace.attempts, 3);
    assert_eq!(trace.delays_ms, vec![2000, 4000]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_voice_retry_commits_second_attempt_file() {
    let tmp = tempfile::tempdir().unwrap();
    let tts = FakeSpeechSynthesizer::new().failing_times(1, StageError::transient("edge-tts timed out"));
    let voice = VoiceStage::new(Arc::new(tts.clone()), "en-US-AriaNeural").descriptor();
    let runner = runner([content_stage(script()), voice]);
    let scope = RunScope::at(Uuid::new_v4(), tmp.path(), CancellationToken::new());

    let report = runner.run(PipelineState::new("cats"), &scope).await;

    assert_run_succeeded(&report);
    assert_eq!(report.trace_for(StageName::Voice).unwrap().attempts, 2);
    assert_eq!(tts.call_count(), 2);
    let audio = report.state.audio_path().unwrap();
    assert!(audio.starts_with(tmp.path().join("voice").join("attempt-2")));
    assert!(audio.exists());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_degrade_content() {
    let content = RecordingStage::new(StageName::Content)
        .failing_with(StageError::transient("503"))
        .with_fallback(StageOutput::new().with_script("Fallback script."));
    let calls = content.calls();
    let runner = runner([content_stage(content), voice_stage(audio())]);

    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_succeeded(&report);
    assert_stage_degraded(&report, StageName::Content);
    assert_eq!(report.state.script(), Some("Fallback script."));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let trace = report.trace_for(StageName::Content).unwrap();
    assert!(trace.degraded);
    assert_eq!(trace.error.as_ref().map(|e| e.kind), Some(ErrorKind::Transient));
}

#[tokio::test(start_paused = true)]
async fn test_configuration_and_permanent_skip_retries() {
    for error in [StageError::configuration("no key"), StageError::permanent("bad reply")] {
        let content = RecordingStage::new(StageName::Content)
            .failing_with(error)
            .with_fallback(StageOutput::new().with_script("Fallback script."));
        let calls = content.calls();
        let runner = runner([content_stage(content)]);

        let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

        assert_run_succeeded(&report);
        assert_stage_degraded(&report, StageName::Content);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(report.trace_for(StageName::Content).unwrap().delays_ms.is_empty());
    }
}

#[tokio::test]
async fn test_offline_content_uses_topic_fallback() {
    let generator = Arc::new(ScriptedContentGenerator::new(vec![Err(StageError::configuration(
        "GEMINI_API_KEY not set",
    ))]));
    let runner = PipelineBuilder::new("content")
        .with_initial_fields([StateField::Topic])
        .stage(ContentStage::new(generator.clone()).descriptor())
        .build()
        .unwrap();

    let report = runner
        .run(PipelineState::new("quantum computing"), &scope(CancellationToken::new()))
        .await;

    assert_run_succeeded(&report);
    assert_stage_degraded(&report, StageName::Content);
    assert!(report.state.script().unwrap().contains("quantum computing"));
    assert!(report.state.image_prompt().unwrap().contains("quantum computing"));
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_generated_content_is_committed() {
    let generator = Arc::new(ScriptedContentGenerator::new(vec![Ok(GeneratedContent {
        script: "Octopuses have three hearts.".to_string(),
        caption: "Three hearts! #octopus".to_string(),
        image_prompt: "an octopus reading a book".to_string(),
    })]));
    let runner = PipelineBuilder::new("content")
        .with_initial_fields([StateField::Topic])
        .stage(ContentStage::new(generator).descriptor())
        .build()
        .unwrap();

    let report = runner.run(PipelineState::new("octopus"), &scope(CancellationToken::new())).await;

    assert_run_succeeded(&report);
    assert!(report.state.degraded_stages().is_empty());
    assert_eq!(report.state.caption(), Some("Three hearts! #octopus"));
}

#[tokio::test]
async fn test_concurrent_merge_is_deterministic() {
    for _ in 0..20 {
        let runner = runner([
            content_stage(script()),
            voice_stage(audio().with_random_delay(3)),
            visual_stage(image().with_random_delay(3)),
        ]);

        let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

        assert_run_succeeded(&report);
        assert_trace_order(&report, &[StageName::Content, StageName::Voice, StageName::Visual]);
        assert_eq!(report.state.audio_path().unwrap().to_str(), Some("voice.mp3"));
        assert_eq!(report.state.image_path().unwrap().to_str(), Some("face.png"));
        assert_eq!(report.state.current_step(), Some(StageName::Visual));
    }
}

#[tokio::test]
async fn test_concurrent_siblings_see_same_base_state() {
    let voice = audio();
    let visual = image();
    let voice_seen = voice.seen_states();
    let visual_seen = visual.seen_states();
    let runner = runner([content_stage(script()), voice_stage(voice), visual_stage(visual)]);

    runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    let voice_seen = voice_seen.lock();
    let visual_seen = visual_seen.lock();
    assert_eq!(voice_seen.len(), 1);
    assert_eq!(voice_seen[0], visual_seen[0]);
    assert!(visual_seen[0].audio_path().is_none());
}

#[tokio::test]
async fn test_concurrent_sibling_failure_keeps_successful_output() {
    let runner = runner([
        content_stage(script()),
        voice_stage(audio()),
        visual_stage(RecordingStage::new(StageName::Visual).failing_with(StageError::permanent("no face"))),
        animation_stage(video()),
    ]);

    let report = runner.run(PipelineState::new("cats"), &scope(CancellationToken::new())).await;

    assert_run_failed_at(&report, StageName::Visual, ErrorKind::Permanent);
    assert!(report.state.audio_path().is_some());
    assert!(report.state.image_path().is_none());
    assert_stage_status(&report, StageName::Voice, StageStatus::Succeeded);
    assert_stage_status(&report, StageName::Animation, StageStatus::NotStarted);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let content = script();
    let calls = content.calls();
    let runner = runner([content_stage(content), voice_stage(audio())]);
    let token = CancellationToken::new();
    token.cancel("user abort");

    let report = runner.run(PipelineState::new("cats"), &scope(token)).await;

    assert_run_failed_at(&report, StageName::Content, ErrorKind::Cancelled);
    assert_eq!(report.error().unwrap().message, "user abort");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(report.trace.iter().all(|t| t.status == StageStatus::NotStarted));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_backoff() {
    let voice = RecordingStage::new(StageName::Voice).failing_with(StageError::transient("timeout"));
    let calls = voice.calls();
    let runner = runner([content_stage(script()), voice_stage(voice)]);
    let token = CancellationToken::with_timeout(std::time::Duration::from_millis(3000));

    let report = runner.run(PipelineState::new("cats"), &scope(token)).await;

    assert_run_failed_at(&report, StageName::Voice, ErrorKind::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.state.script(), Some("Cats are liquid."));
}

#[test]
fn test_retry_config_round_trips_through_runner() {
    let runner = PipelineBuilder::new("content")
        .with_initial_fields([StateField::Topic])
        .with_retry(RetryConfig::new().with_max_attempts(5))
        .stage(content_stage(script()))
        .build()
        .unwrap();

    assert_eq!(runner.stage_names(), vec![StageName::Content]);
    assert_eq!(runner.group_count(), 1);
}

#[cfg(unix)]
mod fake_tools {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::orchestrator::Orchestrator;
    use crate::testing::{install_fake_tools, write_script, SILENT_SADTALKER};

    #[tokio::test]
    async fn test_end_to_end_with_real_adapters() {
        let tmp = tempfile::tempdir().unwrap();
        let config = install_fake_tools(tmp.path()).unwrap();
        let avatar = config.visual.image_path.clone().unwrap();
        let orchestrator = Orchestrator::builder(config)
            .with_configured_adapters()
            .unwrap()
            .build()
            .unwrap();

        let report = orchestrator.produce_content(Some("cats")).await;

        assert_run_succeeded(&report);
        let state = &report.state;
        assert_eq!(state.image_path(), Some(avatar.as_path()));
        assert!(state.audio_path().unwrap().is_file());
        let video = state.video_path().unwrap();
        assert!(video.is_file());
        assert_eq!(video.file_name().unwrap(), "2024_01_01_00.00.00.mp4");
        assert_eq!(state.metadata()["publish_status"], "dry_run");
        assert_stage_degraded(&report, StageName::Content);
        assert_stage_degraded(&report, StageName::Marketing);
    }

    #[tokio::test]
    async fn test_animator_without_video_fails_run() {
        let tmp = tempfile::tempdir().unwrap();
        let config = install_fake_tools(tmp.path()).unwrap();
        write_script(&config.animation.python, SILENT_SADTALKER).unwrap();
        let orchestrator = Orchestrator::from_config(&config).unwrap();

        let report = orchestrator.produce_content(Some("cats")).await;

        assert_run_failed_at(&report, StageName::Animation, ErrorKind::Permanent);
        assert!(report.state.audio_path().is_some());
        assert!(report.state.video_path().is_none());
        assert_stage_status(&report, StageName::Marketing, StageStatus::NotStarted);
    }
}
