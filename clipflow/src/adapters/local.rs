//! Offline adapters that need no credentials.

use super::{
    fallback, EngagementChannel, Interaction, MarketingOptimizer, MarketingPackage,
    MarketingRequest, PublishReceipt, PublishRequest, Publisher, TopicSource,
};
use crate::errors::StageError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

/// Offers a fixed list of trends as topics.
#[derive(Debug, Clone)]
pub struct StaticTopicSource {
    trends: Vec<String>,
}

impl StaticTopicSource {
    /// Creates a source over `trends`; leading `#` characters are stripped.
    #[must_use]
    pub fn new(trends: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            trends: trends.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for StaticTopicSource {
    fn default() -> Self {
        Self::new(fallback::DEFAULT_TRENDS)
    }
}

#[async_trait]
impl TopicSource for StaticTopicSource {
    async fn candidate_topics(&self, _niche: &str) -> Result<Vec<String>, StageError> {
        Ok(self
            .trends
            .iter()
            .map(|t| fallback::trend_topic(t))
            .filter(|t| !t.is_empty())
            .collect())
    }
}

/// Derives hashtags and a posting time from the topic alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedMarketing;

#[async_trait]
impl MarketingOptimizer for RuleBasedMarketing {
    async fn optimize(&self, request: &MarketingRequest<'_>) -> Result<MarketingPackage, StageError> {
        Ok(fallback::marketing(request.topic))
    }
}

/// Records what would be published without contacting a platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, StageError> {
        if !request.video_path.is_file() {
            return Err(StageError::precondition(format!(
                "video not found: {}",
                request.video_path.display()
            )));
        }
        info!(video = %request.video_path.display(), "dry-run publish");
        Ok(PublishReceipt {
            status: "dry_run".to_string(),
            url: format!("file://{}", request.video_path.display()),
        })
    }
}

/// An engagement channel backed by memory, per platform.
#[derive(Debug, Default)]
pub struct InMemoryEngagementChannel {
    inbox: Mutex<HashMap<String, Vec<Interaction>>>,
    replies: Mutex<Vec<(String, String, String)>>,
}

impl InMemoryEngagementChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues interactions for `platform`.
    #[must_use]
    pub fn with_interactions(
        self,
        platform: impl Into<String>,
        interactions: impl IntoIterator<Item = Interaction>,
    ) -> Self {
        self.inbox
            .lock()
            .entry(platform.into())
            .or_default()
            .extend(interactions);
        self
    }

    /// Returns posted replies as `(platform, interaction id, reply)`.
    #[must_use]
    pub fn replies(&self) -> Vec<(String, String, String)> {
        self.replies.lock().clone()
    }
}

#[async_trait]
impl EngagementChannel for InMemoryEngagementChannel {
    async fn fetch_interactions(&self, platform: &str) -> Result<Vec<Interaction>, StageError> {
        Ok(self.inbox.lock().remove(platform).unwrap_or_default())
    }

    async fn post_reply(
        &self,
        platform: &str,
        interaction: &Interaction,
        reply: &str,
    ) -> Result<(), StageError> {
        self.replies
            .lock()
            .push((platform.to_string(), interaction.id.clone(), reply.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::path::Path;

    #[tokio::test]
    async fn test_static_topics() {
        let topics = StaticTopicSource::default().candidate_topics("tech").await.unwrap();
        assert_eq!(topics, vec!["AIRevolution", "TechTips", "FutureIsNow"]);

        let custom = StaticTopicSource::new(["#", "cats"]);
        assert_eq!(custom.candidate_topics("").await.unwrap(), vec!["cats"]);
    }

    #[tokio::test]
    async fn test_rule_based_marketing() {
        let request = MarketingRequest {
            topic: "cats",
            caption: None,
            script: None,
        };
        let package = RuleBasedMarketing.optimize(&request).await.unwrap();
        assert_eq!(package.hashtags, vec!["#viral", "#Cats"]);
    }

    #[tokio::test]
    async fn test_dry_run_publisher() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("clip.mp4");
        std::fs::write(&video, b"mp4").unwrap();
        let metadata = BTreeMap::new();

        let receipt = DryRunPublisher
            .publish(&PublishRequest {
                video_path: &video,
                caption: None,
                metadata: &metadata,
            })
            .await
            .unwrap();
        assert_eq!(receipt.status, "dry_run");
        assert!(receipt.url.starts_with("file://"));

        let err = DryRunPublisher
            .publish(&PublishRequest {
                video_path: Path::new("/nope/clip.mp4"),
                caption: None,
                metadata: &metadata,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_engagement_channel_drains_inbox() {
        let channel = InMemoryEngagementChannel::new()
            .with_interactions("tiktok", [Interaction::new("1", "sam", "love it")]);

        let fetched = channel.fetch_interactions("tiktok").await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(channel.fetch_interactions("tiktok").await.unwrap().is_empty());

        channel.post_reply("tiktok", &fetched[0], "thanks").await.unwrap();
        assert_eq!(
            channel.replies(),
            vec![("tiktok".to_string(), "1".to_string(), "thanks".to_string())]
        );
    }
}
