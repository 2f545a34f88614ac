//! Stage trait and the canonical content stages.
//!
//! A stage reads the committed [`PipelineState`], calls one collaborator and
//! returns a [`StageOutput`]. It never writes state itself; the executor
//! checks the output against the stage's descriptor and commits it.

mod animation;
mod content;
mod context;
mod marketing;
mod publishing;
mod topic;
mod visual;
mod voice;

pub use animation::AnimationStage;
pub use content::ContentStage;
pub use context::{RunScope, StageContext};
pub use marketing::MarketingStage;
pub use publishing::PublishingStage;
pub use topic::TopicSelectionStage;
pub use visual::VisualStage;
pub use voice::VoiceStage;

use crate::core::{PipelineState, StageName, StageOutput};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the canonical name of the stage.
    fn name(&self) -> StageName;

    /// Executes one attempt of the stage.
    ///
    /// # Arguments
    ///
    /// * `state` - The state committed by the previous stage
    /// * `ctx` - The attempt context
    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError>;

    /// Produces deterministic fallback output from the state alone.
    ///
    /// Only consulted for stages whose descriptor degrades on failure.
    fn fallback(&self, _state: &PipelineState) -> Option<StageOutput> {
        None
    }
}

pub(crate) fn required_topic(state: &PipelineState) -> Result<&str, StageError> {
    state
        .topic()
        .ok_or_else(|| StageError::precondition("missing required input 'topic'"))
}
