//! Collaborator interfaces and their concrete adapters.
//!
//! Each external capability the pipeline depends on is one async trait.
//! Adapters normalize every failure into a [`StageError`] with one of the
//! `Configuration`, `Transient` or `Permanent` kinds and never touch
//! pipeline state.

mod command;
mod edge_tts;
pub mod fallback;
mod gemini;
mod image;
mod local;
mod sadtalker;

pub use command::{ToolCommand, ToolOutput};
pub use edge_tts::EdgeTtsSynthesizer;
pub use gemini::{extract_json, parse_sections, GeminiClient};
#[cfg(feature = "stock-images")]
pub use image::PexelsImageSource;
pub use image::StaticImageSource;
pub use local::{
    DryRunPublisher, InMemoryEngagementChannel, RuleBasedMarketing, StaticTopicSource,
};
pub use sadtalker::{detect_device, newest_media_file, DeviceMode, PreprocessMode, SadTalkerAnimator};

use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Script, caption and image prompt for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Spoken script.
    pub script: String,
    /// Post caption.
    pub caption: String,
    /// Prompt describing the visual.
    pub image_prompt: String,
}

/// Writes the text content for a topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync + Debug {
    /// Generates script, caption and image prompt for `topic`.
    async fn generate_text_content(&self, topic: &str) -> Result<GeneratedContent, StageError>;
}

/// Turns text into a voice-over file.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + Debug {
    /// Synthesizes `text` with `voice_id` into `output_path` and returns the
    /// path of the written audio.
    async fn synthesize_speech(
        &self,
        text: &str,
        voice_id: &str,
        output_path: &Path,
    ) -> Result<PathBuf, StageError>;
}

/// Animates a face image with a voice-over.
#[async_trait]
pub trait FaceAnimator: Send + Sync + Debug {
    /// Writes a talking-head video into `output_dir` and returns its path.
    async fn animate_face(
        &self,
        image_path: &Path,
        audio_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, StageError>;
}

/// Proposes topics when the caller did not supply one.
#[async_trait]
pub trait TopicSource: Send + Sync + Debug {
    /// Returns candidate topics for `niche`, best first.
    async fn candidate_topics(&self, niche: &str) -> Result<Vec<String>, StageError>;
}

/// What an image source may use to pick or fetch an image.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    /// The run topic.
    pub topic: &'a str,
    /// The generated image prompt, if content ran.
    pub image_prompt: Option<&'a str>,
    /// Directory for downloaded files.
    pub output_dir: &'a Path,
}

/// Provides the face image to animate.
#[async_trait]
pub trait ImageSource: Send + Sync + Debug {
    /// Returns the path of an image on disk.
    async fn acquire_image(&self, request: &ImageRequest<'_>) -> Result<PathBuf, StageError>;
}

/// What a marketing optimizer works from.
#[derive(Debug, Clone, Copy)]
pub struct MarketingRequest<'a> {
    /// The run topic.
    pub topic: &'a str,
    /// The caption, if content ran.
    pub caption: Option<&'a str>,
    /// The script, if content ran.
    pub script: Option<&'a str>,
}

/// Marketing and SEO metadata for a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketingPackage {
    /// Hashtags to attach.
    pub hashtags: Vec<String>,
    /// Suggested posting time.
    pub posting_time: String,
    /// Search-optimized title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Search-optimized description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Search keywords.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Platform tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl MarketingPackage {
    /// Flattens the package into metadata entries.
    #[must_use]
    pub fn into_metadata(self) -> BTreeMap<String, serde_json::Value> {
        let mut entries = BTreeMap::new();
        entries.insert("hashtags".to_string(), serde_json::json!(self.hashtags));
        entries.insert("posting_time".to_string(), serde_json::json!(self.posting_time));
        if let Some(title) = self.title {
            entries.insert("seo_title".to_string(), serde_json::json!(title));
        }
        if let Some(description) = self.description {
            entries.insert("seo_description".to_string(), serde_json::json!(description));
        }
        if !self.keywords.is_empty() {
            entries.insert("seo_keywords".to_string(), serde_json::json!(self.keywords));
        }
        if !self.tags.is_empty() {
            entries.insert("seo_tags".to_string(), serde_json::json!(self.tags));
        }
        entries
    }
}

/// Produces marketing metadata for a post.
#[async_trait]
pub trait MarketingOptimizer: Send + Sync + Debug {
    /// Builds the marketing package.
    async fn optimize(&self, request: &MarketingRequest<'_>) -> Result<MarketingPackage, StageError>;
}

/// What gets published.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    /// The finished video.
    pub video_path: &'a Path,
    /// The post caption.
    pub caption: Option<&'a str>,
    /// Metadata accumulated so far.
    pub metadata: &'a BTreeMap<String, serde_json::Value>,
}

/// Result of a publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Platform status string.
    pub status: String,
    /// Where the post can be found.
    pub url: String,
}

/// Publishes a finished video.
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    /// Publishes and returns the receipt.
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, StageError>;
}

/// A comment or message from the audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Platform ID of the interaction.
    pub id: String,
    /// Author handle.
    pub author: String,
    /// The text to reply to.
    pub text: String,
}

impl Interaction {
    /// Creates an interaction.
    #[must_use]
    pub fn new(id: impl Into<String>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
        }
    }
}

/// Reads interactions from and posts replies to a platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngagementChannel: Send + Sync + Debug {
    /// Fetches interactions not yet answered.
    async fn fetch_interactions(&self, platform: &str) -> Result<Vec<Interaction>, StageError>;

    /// Posts `reply` to `interaction`.
    async fn post_reply(
        &self,
        platform: &str,
        interaction: &Interaction,
        reply: &str,
    ) -> Result<(), StageError>;
}

/// Writes replies to audience interactions.
#[async_trait]
pub trait ReplyWriter: Send + Sync + Debug {
    /// Writes a reply in the voice of `persona`.
    async fn write_reply(&self, persona: &str, interaction: &Interaction) -> Result<String, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marketing_package_metadata() {
        let package = MarketingPackage {
            hashtags: vec!["#viral".to_string()],
            posting_time: "12:00 PM".to_string(),
            title: Some("Cats, explained".to_string()),
            ..MarketingPackage::default()
        };
        let metadata = package.into_metadata();

        assert_eq!(metadata["hashtags"], serde_json::json!(["#viral"]));
        assert_eq!(metadata["posting_time"], "12:00 PM");
        assert_eq!(metadata["seo_title"], "Cats, explained");
        assert!(!metadata.contains_key("seo_tags"));
    }
}
