//! Talking-head animation.

use super::{Stage, StageContext};
use crate::adapters::FaceAnimator;
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::StageDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Animates the face image with the voice-over.
///
/// Each attempt writes into its own directory so a retry never picks up a
/// partial video from an earlier attempt.
#[derive(Debug, Clone)]
pub struct AnimationStage {
    animator: Arc<dyn FaceAnimator>,
}

impl AnimationStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(animator: Arc<dyn FaceAnimator>) -> Self {
        Self { animator }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::AudioPath, StateField::ImagePath])
            .produces([StateField::VideoPath])
    }
}

#[async_trait]
impl Stage for AnimationStage {
    fn name(&self) -> StageName {
        StageName::Animation
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let (Some(audio), Some(image)) = (state.audio_path(), state.image_path()) else {
            return Err(StageError::precondition(
                "animation needs both audio_path and image_path",
            ));
        };

        let dir = ctx.attempt_dir();
        ctx.ensure_dir(&dir).await?;
        let video = self.animator.animate_face(image, audio, &dir).await?;

        info!(video = %video.display(), "animation finished");
        Ok(StageOutput::new().with_video_path(video))
    }
}
