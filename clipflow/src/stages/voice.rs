//! Voice-over synthesis.

use super::{Stage, StageContext};
use crate::adapters::SpeechSynthesizer;
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::StageDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

/// File name of the synthesized voice-over inside the attempt directory.
pub const VOICE_FILE: &str = "voice.mp3";

/// Synthesizes the script into `<run>/voice/attempt-<n>/voice.mp3`.
#[derive(Debug, Clone)]
pub struct VoiceStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice_id: String,
}

impl VoiceStage {
    /// Creates the stage speaking with `voice_id`.
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, voice_id: impl Into<String>) -> Self {
        Self {
            synthesizer,
            voice_id: voice_id.into(),
        }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::Script])
            .produces([StateField::AudioPath])
    }
}

#[async_trait]
impl Stage for VoiceStage {
    fn name(&self) -> StageName {
        StageName::Voice
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let script = state
            .script()
            .ok_or_else(|| StageError::precondition("missing required input 'script'"))?;

        let dir = ctx.attempt_dir();
        ctx.ensure_dir(&dir).await?;
        let audio = self
            .synthesizer
            .synthesize_speech(script, &self.voice_id, &dir.join(VOICE_FILE))
            .await?;

        Ok(StageOutput::new().with_audio_path(audio))
    }
}
