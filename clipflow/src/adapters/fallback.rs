//! Deterministic fallback content derived from the topic alone.
//!
//! Used when a content-class stage cannot reach its collaborator. Nothing
//! here touches the network or the filesystem.

use super::{GeneratedContent, MarketingPackage};
use crate::utils::hashtag;

/// Topics offered when no trend source is reachable.
pub const DEFAULT_TRENDS: [&str; 3] = ["#AIRevolution", "#TechTips", "#FutureIsNow"];

/// Posting time suggested without an optimizer.
pub const DEFAULT_POSTING_TIME: &str = "12:00 PM";

/// Returns script, caption and image prompt for `topic`.
#[must_use]
pub fn content(topic: &str) -> GeneratedContent {
    let topic = topic.trim();
    let caption = match hashtag(topic) {
        Some(tag) => format!("Checking out {topic} today! #AI {tag}"),
        None => format!("Checking out {topic} today! #AI"),
    };

    GeneratedContent {
        script: format!("Hey guys! Did you know about {topic}? It's absolutely wild. Follow for more!"),
        caption,
        image_prompt: format!("futuristic representation of {topic}, 8k, bokeh"),
    }
}

/// Returns the first default trend, stripped of its `#`.
#[must_use]
pub fn topic() -> String {
    trend_topic(DEFAULT_TRENDS[0])
}

/// Turns a hashtag-style trend into a topic.
#[must_use]
pub fn trend_topic(trend: &str) -> String {
    trend.trim().trim_start_matches('#').to_string()
}

/// Returns marketing metadata for `topic`.
#[must_use]
pub fn marketing(topic: &str) -> MarketingPackage {
    let mut hashtags = vec!["#viral".to_string()];
    if let Some(tag) = hashtag(topic) {
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }

    MarketingPackage {
        hashtags,
        posting_time: DEFAULT_POSTING_TIME.to_string(),
        ..MarketingPackage::default()
    }
}

/// Returns a reply that works for any interaction.
#[must_use]
pub fn reply(author: &str) -> String {
    if author.trim().is_empty() {
        "Thanks for watching! More coming soon.".to_string()
    } else {
        format!("Thanks @{}! More coming soon.", author.trim().trim_start_matches('@'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_content_is_deterministic_and_non_empty() {
        let first = content("quantum computing");
        let second = content("quantum computing");

        assert_eq!(first, second);
        assert_eq!(
            first.script,
            "Hey guys! Did you know about quantum computing? It's absolutely wild. Follow for more!"
        );
        assert_eq!(first.caption, "Checking out quantum computing today! #AI #QuantumComputing");
        assert_eq!(first.image_prompt, "futuristic representation of quantum computing, 8k, bokeh");
    }

    #[test]
    fn test_default_topic() {
        assert_eq!(topic(), "AIRevolution");
        assert_eq!(trend_topic(" #TechTips "), "TechTips");
    }

    #[test]
    fn test_marketing() {
        let package = marketing("cats");
        assert_eq!(package.hashtags, vec!["#viral", "#Cats"]);
        assert_eq!(package.posting_time, "12:00 PM");

        let viral = marketing("viral");
        assert_eq!(viral.hashtags, vec!["#viral", "#Viral"]);
    }

    #[test]
    fn test_reply() {
        assert_eq!(reply("@sam"), "Thanks @sam! More coming soon.");
        assert_eq!(reply(""), "Thanks for watching! More coming soon.");
    }
}
