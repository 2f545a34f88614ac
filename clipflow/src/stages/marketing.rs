//! Marketing and SEO metadata.

use super::{required_topic, Stage, StageContext};
use crate::adapters::{fallback, MarketingOptimizer, MarketingRequest};
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::{Recovery, StageDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// Attaches hashtags, a posting time and SEO fields to the run metadata.
#[derive(Debug, Clone)]
pub struct MarketingStage {
    optimizer: Arc<dyn MarketingOptimizer>,
}

impl MarketingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(optimizer: Arc<dyn MarketingOptimizer>) -> Self {
        Self { optimizer }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::Topic, StateField::VideoPath])
            .produces([StateField::Metadata])
            .with_recovery(Recovery::Degrade)
    }
}

#[async_trait]
impl Stage for MarketingStage {
    fn name(&self) -> StageName {
        StageName::Marketing
    }

    async fn execute(
        &self,
        state: &PipelineState,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let request = MarketingRequest {
            topic: required_topic(state)?,
            caption: state.caption(),
            script: state.script(),
        };
        let package = self.optimizer.optimize(&request).await?;
        Ok(StageOutput::new().with_metadata_entries(package.into_metadata()))
    }

    fn fallback(&self, state: &PipelineState) -> Option<StageOutput> {
        let package = fallback::marketing(state.topic()?);
        Some(StageOutput::new().with_metadata_entries(package.into_metadata()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RuleBasedMarketing;
    use crate::cancellation::CancellationToken;
    use crate::stages::RunScope;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_metadata_from_optimizer() {
        let scope = RunScope::at(Uuid::nil(), "/tmp/clipflow-marketing", CancellationToken::new());
        let stage = MarketingStage::new(Arc::new(RuleBasedMarketing));

        let output = stage
            .execute(&PipelineState::new("cats"), &scope.stage_context(StageName::Marketing, 1))
            .await
            .unwrap();

        assert_eq!(output.fields(), vec![StateField::Metadata]);
        assert_eq!(output.metadata["hashtags"], json!(["#viral", "#Cats"]));
        assert_eq!(output.metadata["posting_time"], "12:00 PM");
    }

    #[test]
    fn test_fallback_needs_topic() {
        let stage = MarketingStage::new(Arc::new(RuleBasedMarketing));
        assert!(stage.fallback(&PipelineState::untitled()).is_none());

        let output = stage.fallback(&PipelineState::new("dogs")).unwrap();
        assert_eq!(output.metadata["hashtags"], json!(["#viral", "#Dogs"]));
    }
}
