//! Face image acquisition.

use super::{required_topic, Stage, StageContext};
use crate::adapters::{ImageRequest, ImageSource};
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::StageDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

/// Acquires the face image. Runs alongside [`super::VoiceStage`].
#[derive(Debug, Clone)]
pub struct VisualStage {
    source: Arc<dyn ImageSource>,
}

impl VisualStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self { source }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::Topic])
            .produces([StateField::ImagePath])
            .independent()
    }
}

#[async_trait]
impl Stage for VisualStage {
    fn name(&self) -> StageName {
        StageName::Visual
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let topic = required_topic(state)?;
        let output_dir = ctx.attempt_dir();
        let request = ImageRequest {
            topic,
            image_prompt: state.image_prompt(),
            output_dir: &output_dir,
        };

        let image = self.source.acquire_image(&request).await?;
        Ok(StageOutput::new().with_image_path(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticImageSource;
    use crate::cancellation::CancellationToken;
    use crate::errors::ErrorKind;
    use crate::stages::RunScope;
    use crate::testing::FakeImageSource;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_downloads_into_attempt_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let scope = RunScope::at(Uuid::new_v4(), tmp.path(), CancellationToken::new());
        let stage = VisualStage::new(Arc::new(FakeImageSource::new()));

        let output = stage
            .execute(&PipelineState::new("cats"), &scope.stage_context(StageName::Visual, 2))
            .await
            .unwrap();

        let image = output.image_path.unwrap();
        assert!(image.starts_with(tmp.path().join("visual").join("attempt-2")));
        assert!(image.is_file());
    }

    #[tokio::test]
    async fn test_unconfigured_avatar_fails() {
        let scope = RunScope::at(Uuid::nil(), "/tmp/clipflow-visual", CancellationToken::new());
        let stage = VisualStage::new(Arc::new(StaticImageSource::default()));

        let err = stage
            .execute(&PipelineState::new("cats"), &scope.stage_context(StageName::Visual, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_descriptor_is_independent() {
        let descriptor = VisualStage::new(Arc::new(FakeImageSource::new())).descriptor();
        assert!(descriptor.independent);
        assert!(!descriptor.degrades());
    }
}
