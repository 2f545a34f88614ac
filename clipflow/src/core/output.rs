//! Stage output: the field writes a stage asks the executor to commit.

use super::StateField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The output of a stage execution.
///
/// Outputs are never applied by the stage itself. The executor commits them
/// into a fresh [`super::PipelineState`] after checking them against the
/// stage's declared outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Selected topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Spoken script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Post caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Prompt describing the visual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    /// Synthesized voice-over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    /// Face image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    /// Animated talking-head video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Metadata entries to add.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Whether the output came from fallback content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl StageOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the script.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Sets the caption.
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Sets the image prompt.
    #[must_use]
    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt = Some(prompt.into());
        self
    }

    /// Sets the audio path.
    #[must_use]
    pub fn with_audio_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    /// Sets the image path.
    #[must_use]
    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// Sets the video path.
    #[must_use]
    pub fn with_video_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.video_path = Some(path.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Adds several metadata entries.
    #[must_use]
    pub fn with_metadata_entries(
        mut self,
        entries: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        self.metadata.extend(entries);
        self
    }

    /// Marks the output as produced by fallback content.
    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Returns the fields this output writes.
    #[must_use]
    pub fn fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if self.topic.is_some() {
            fields.push(StateField::Topic);
        }
        if self.script.is_some() {
            fields.push(StateField::Script);
        }
        if self.caption.is_some() {
            fields.push(StateField::Caption);
        }
        if self.image_prompt.is_some() {
            fields.push(StateField::ImagePrompt);
        }
        if self.audio_path.is_some() {
            fields.push(StateField::AudioPath);
        }
        if self.image_path.is_some() {
            fields.push(StateField::ImagePath);
        }
        if self.video_path.is_some() {
            fields.push(StateField::VideoPath);
        }
        if !self.metadata.is_empty() {
            fields.push(StateField::Metadata);
        }
        fields
    }
}
