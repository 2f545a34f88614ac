//! Stage names and execution status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The canonical stages of a content run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Picks a topic when the caller did not supply one.
    TopicSelection,
    /// Writes the script, caption and image prompt.
    Content,
    /// Synthesizes the voice-over.
    Voice,
    /// Acquires the face image.
    Visual,
    /// Animates the face with the voice-over.
    Animation,
    /// Attaches marketing and SEO metadata.
    Marketing,
    /// Publishes the finished video.
    Publishing,
}

impl StageName {
    /// All stages in canonical order.
    pub const CANONICAL_ORDER: [Self; 7] = [
        Self::TopicSelection,
        Self::Content,
        Self::Voice,
        Self::Visual,
        Self::Animation,
        Self::Marketing,
        Self::Publishing,
    ];

    /// Position of the stage in the canonical order.
    #[must_use]
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Returns the stable string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopicSelection => "topic_selection",
            Self::Content => "content",
            Self::Voice => "voice",
            Self::Visual => "visual",
            Self::Animation => "animation",
            Self::Marketing => "marketing",
            Self::Publishing => "publishing",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CANONICAL_ORDER
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

impl PartialEq<&str> for StageName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// The execution status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage has not been entered.
    #[default]
    NotStarted,
    /// The stage is executing.
    Running,
    /// The stage committed its outputs.
    Succeeded,
    /// The stage failed and the run is terminal.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if `next` is a legal transition from this status.
    ///
    /// A stage may fail without running (precondition or cancellation),
    /// but can only succeed after running.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}
