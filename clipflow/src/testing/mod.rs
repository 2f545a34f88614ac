//! Testing utilities for clipflow pipelines.
//!
//! This module provides:
//! - A scriptable recording stage
//! - Fake collaborators for every external tool and service
//! - Shell-script stand-ins for `edge-tts` and SadTalker
//! - Assertions over run reports

mod assertions;
mod fakes;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_run_failed_at, assert_run_succeeded, assert_stage_degraded, assert_stage_status,
    assert_trace_order,
};
pub use fakes::{
    FakeFaceAnimator, FakeImageSource, FakeSpeechSynthesizer, ScriptedContentGenerator,
    ScriptedReplyWriter,
};
#[cfg(unix)]
pub use fixtures::{install_fake_tools, write_script};
pub use fixtures::{FAKE_EDGE_TTS, FAKE_SADTALKER, SILENT_SADTALKER};
pub use mocks::RecordingStage;
