//! Publishing.

use super::{Stage, StageContext};
use crate::adapters::{PublishRequest, Publisher};
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::StageDescriptor;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Hands the finished video to a [`Publisher`] and records the receipt.
#[derive(Debug, Clone)]
pub struct PublishingStage {
    publisher: Arc<dyn Publisher>,
}

impl PublishingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::VideoPath])
            .produces([StateField::Metadata])
    }
}

#[async_trait]
impl Stage for PublishingStage {
    fn name(&self) -> StageName {
        StageName::Publishing
    }

    async fn execute(
        &self,
        state: &PipelineState,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let video_path = state
            .video_path()
            .ok_or_else(|| StageError::precondition("missing required input 'video_path'"))?;

        let receipt = self
            .publisher
            .publish(&PublishRequest {
                video_path,
                caption: state.caption(),
                metadata: state.metadata(),
            })
            .await?;

        Ok(StageOutput::new()
            .with_metadata("publish_status", json!(receipt.status))
            .with_metadata("publish_url", json!(receipt.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DryRunPublisher;
    use crate::cancellation::CancellationToken;
    use crate::stages::RunScope;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_receipt_becomes_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("clip.mp4");
        std::fs::write(&video, b"mp4").unwrap();
        let state = PipelineState::new("cats")
            .apply(StageName::Animation, &[StateField::VideoPath], StageOutput::new().with_video_path(&video))
            .unwrap();
        let scope = RunScope::at(Uuid::nil(), tmp.path(), CancellationToken::new());

        let output = PublishingStage::new(Arc::new(DryRunPublisher))
            .execute(&state, &scope.stage_context(StageName::Publishing, 1))
            .await
            .unwrap();

        assert_eq!(output.metadata["publish_status"], "dry_run");
        assert_eq!(
            output.metadata["publish_url"],
            json!(format!("file://{}", video.display()))
        );
    }
}
