//! Script, caption and image prompt generation.

use super::{required_topic, Stage, StageContext};
use crate::adapters::{fallback, ContentGenerator, GeneratedContent};
use crate::core::{PipelineState, StageName, StageOutput, StateField};
use crate::errors::StageError;
use crate::pipeline::{Recovery, StageDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Writes the text content for the run topic.
#[derive(Debug, Clone)]
pub struct ContentStage {
    generator: Arc<dyn ContentGenerator>,
}

impl ContentStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    /// Wraps the stage in its descriptor.
    #[must_use]
    pub fn descriptor(self) -> StageDescriptor {
        StageDescriptor::new(Arc::new(self))
            .requires([StateField::Topic])
            .produces([StateField::Script, StateField::Caption, StateField::ImagePrompt])
            .with_recovery(Recovery::Degrade)
    }
}

fn into_output(content: GeneratedContent) -> StageOutput {
    StageOutput::new()
        .with_script(content.script)
        .with_caption(content.caption)
        .with_image_prompt(content.image_prompt)
}

#[async_trait]
impl Stage for ContentStage {
    fn name(&self) -> StageName {
        StageName::Content
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let topic = required_topic(state)?;
        debug!(topic, attempt = ctx.attempt(), "generating content");
        let content = self.generator.generate_text_content(topic).await?;
        Ok(into_output(content))
    }

    fn fallback(&self, state: &PipelineState) -> Option<StageOutput> {
        state.topic().map(|topic| into_output(fallback::content(topic)))
    }
}
