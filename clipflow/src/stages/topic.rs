//! Topic selection.

use super::{Stage, StageContext};
use crate::adapters::{fallback, TopicSource};
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::{Recovery, StageDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Picks the run topic from a [`TopicSource`].
#[derive(Debug, Clone)]
pub struct TopicSelectionStage {
    source: Arc<dyn TopicSource>,
    niche: String,
}

impl TopicSelectionStage {
    /// Creates the stage for `niche`.
    #[must_use]
    pub fn new(source: Arc<dyn TopicSource>, niche: impl Into<String>) -> Self {
        Self {
            source,
            niche: niche.into(),
        }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .produces([StateField::Topic])
            .with_recovery(Recovery::Degrade)
    }
}

#[async_trait]
impl Stage for TopicSelectionStage {
    fn name(&self) -> StageName {
        StageName::TopicSelection
    }

    async fn execute(
        &self,
        _state: &PipelineState,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let topics = self.source.candidate_topics(&self.niche).await?;
        let topic = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
            .ok_or_else(|| StageError::permanent(format!("no topic found for '{}'", self.niche)))?;

        info!(topic = %topic, "selected topic");
        Ok(StageOutput::new().with_topic(topic))
    }

    fn fallback(&self, _state: &PipelineState) -> Option<StageOutput> {
        Some(StageOutput::new().with_topic(fallback::topic()))
    }
}
