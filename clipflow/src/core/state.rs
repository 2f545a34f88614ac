//! The pipeline state record threaded from stage to stage.

use super::{StageName, StageOutput};
use crate::errors::StageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A named slot of [`PipelineState`] that stages read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// The run topic.
    Topic,
    /// Spoken script.
    Script,
    /// Post caption.
    Caption,
    /// Prompt describing the visual.
    ImagePrompt,
    /// Voice-over file.
    AudioPath,
    /// Face image file.
    ImagePath,
    /// Talking-head video file.
    VideoPath,
    /// Accumulated marketing and publishing metadata.
    Metadata,
}

impl StateField {
    /// Returns the stable string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Script => "script",
            Self::Caption => "caption",
            Self::ImagePrompt => "image_prompt",
            Self::AudioPath => "audio_path",
            Self::ImagePath => "image_path",
            Self::VideoPath => "video_path",
            Self::Metadata => "metadata",
        }
    }

    /// Returns true if several stages may contribute to this field.
    #[must_use]
    pub fn is_accumulated(self) -> bool {
        matches!(self, Self::Metadata)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single record passed stage to stage during a run.
///
/// Fields are private: the only way to change a state is to derive a new one
/// through [`PipelineState::apply`] or [`PipelineState::fail`], which enforce
/// the write-once and terminal-error rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_step: Option<StageName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<StageError>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    degraded: Vec<StageName>,
}

impl PipelineState {
    /// Creates a fresh state for a run on the given topic.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::untitled()
        }
    }

    /// Creates a fresh state whose topic will be chosen by topic selection.
    #[must_use]
    pub fn untitled() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            topic: None,
            script: None,
            caption: None,
            image_prompt: None,
            audio_path: None,
            image_path: None,
            video_path: None,
            current_step: None,
            error: None,
            metadata: BTreeMap::new(),
            degraded: Vec::new(),
        }
    }

    /// Sets the run ID.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the topic.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Returns the script.
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Returns the caption.
    #[must_use]
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// Returns the image prompt.
    #[must_use]
    pub fn image_prompt(&self) -> Option<&str> {
        self.image_prompt.as_deref()
    }

    /// Returns the voice-over path.
    #[must_use]
    pub fn audio_path(&self) -> Option<&Path> {
        self.audio_path.as_deref()
    }

    /// Returns the face image path.
    #[must_use]
    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    /// Returns the video path.
    #[must_use]
    pub fn video_path(&self) -> Option<&Path> {
        self.video_path.as_deref()
    }

    /// Returns the last successfully completed stage.
    #[must_use]
    pub fn current_step(&self) -> Option<StageName> {
        self.current_step
    }

    /// Returns the terminal error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    /// Returns the accumulated metadata.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Returns the stages whose output came from fallback content.
    #[must_use]
    pub fn degraded_stages(&self) -> &[StageName] {
        &self.degraded
    }

    /// Returns true once an error has been recorded.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Returns true if the field is present and non-empty.
    #[must_use]
    pub fn has(&self, field: StateField) -> bool {
        fn text(value: Option<&String>) -> bool {
            value.is_some_and(|s| !s.trim().is_empty())
        }
        fn path(value: Option<&PathBuf>) -> bool {
            value.is_some_and(|p| !p.as_os_str().is_empty())
        }

        match field {
            StateField::Topic => text(self.topic.as_ref()),
            StateField::Script => text(self.script.as_ref()),
            StateField::Caption => text(self.caption.as_ref()),
            StateField::ImagePrompt => text(self.image_prompt.as_ref()),
            StateField::AudioPath => path(self.audio_path.as_ref()),
            StateField::ImagePath => path(self.image_path.as_ref()),
            StateField::VideoPath => path(self.video_path.as_ref()),
            StateField::Metadata => !self.metadata.is_empty(),
        }
    }

    /// Returns the first of `fields` that is missing or empty.
    #[must_use]
    pub fn first_missing(&self, fields: &[StateField]) -> Option<StateField> {
        fields.iter().copied().find(|field| !self.has(*field))
    }

    /// Returns a terminal copy of this state carrying `error`.
    ///
    /// The first recorded error wins; failing an already failed state
    /// returns it unchanged.
    #[must_use]
    pub fn fail(&self, error: StageError) -> Self {
        let mut next = self.clone();
        if next.error.is_none() {
            next.error = Some(error);
        }
        next
    }

    /// Commits a stage output into a new state value.
    ///
    /// `self` is never modified. The output must write every field in
    /// `declared` and nothing else; set fields cannot be overwritten,
    /// metadata keys cannot be replaced, and `stage` must come after the
    /// current step in canonical order.
    ///
    /// # Errors
    ///
    /// Returns a `Conflict` error for overwrites, undeclared writes, step
    /// regression or a terminal input state, and a `Permanent` error when a
    /// declared output is missing.
    pub fn apply(
        &self,
        stage: StageName,
        declared: &[StateField],
        output: StageOutput,
    ) -> Result<Self, StageError> {
        if let Some(ref err) = self.error {
            return Err(StageError::conflict(format!(
                "cannot commit '{stage}' onto a failed state ({})",
                err.kind
            )));
        }
        if let Some(current) = self.current_step {
            if stage.ordinal() <= current.ordinal() {
                return Err(StageError::conflict(format!(
                    "stage '{stage}' cannot follow '{current}'"
                )));
            }
        }

        let written = output.fields();
        if let Some(field) = written.iter().find(|f| !declared.contains(f)) {
            return Err(StageError::conflict(format!(
                "stage '{stage}' wrote undeclared field '{field}'"
            )));
        }
        if let Some(field) = declared.iter().find(|f| !written.contains(f)) {
            return Err(StageError::permanent(format!(
                "stage '{stage}' produced no {field}"
            )));
        }

        let StageOutput {
            topic,
            script,
            caption,
            image_prompt,
            audio_path,
            image_path,
            video_path,
            metadata,
            degraded,
        } = output;

        let mut next = self.clone();
        write_once(&mut next.topic, topic, StateField::Topic, stage)?;
        write_once(&mut next.script, script, StateField::Script, stage)?;
        write_once(&mut next.caption, caption, StateField::Caption, stage)?;
        write_once(&mut next.image_prompt, image_prompt, StateField::ImagePrompt, stage)?;
        write_once(&mut next.audio_path, audio_path, StateField::AudioPath, stage)?;
        write_once(&mut next.image_path, image_path, StateField::ImagePath, stage)?;
        write_once(&mut next.video_path, video_path, StateField::VideoPath, stage)?;

        for (key, value) in metadata {
            if next.metadata.contains_key(&key) {
                return Err(StageError::conflict(format!(
                    "stage '{stage}' tried to replace metadata key '{key}'"
                )));
            }
            next.metadata.insert(key, value);
        }

        if degraded {
            next.degraded.push(stage);
        }
        next.current_step = Some(stage);
        Ok(next)
    }
}

fn write_once<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    field: StateField,
    stage: StageName,
) -> Result<(), StageError> {
    let Some(value) = value else {
        return Ok(());
    };
    if slot.is_some() {
        return Err(StageError::conflict(format!(
            "stage '{stage}' tried to overwrite {field}"
        )));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    fn content_output() -> StageOutput {
        StageOutput::new()
            .with_script("script")
            .with_caption("caption")
            .with_image_prompt("prompt")
    }

    const CONTENT_FIELDS: [StateField; 3] =
        [StateField::Script, StateField::Caption, StateField::ImagePrompt];

    #[test]
    fn test_new_state() {
        let state = PipelineState::new("cats");
        assert_eq!(state.topic(), Some("cats"));
        assert!(state.current_step().is_none());
        assert!(!state.is_failed());
        assert!(state.has(StateField::Topic));
        assert!(!state.has(StateField::Script));
    }

    #[test]
    fn test_blank_topic_is_missing() {
        let state = PipelineState::new("   ");
        assert_eq!(state.first_missing(&[StateField::Topic]), Some(StateField::Topic));
    }

    #[test]
    fn test_apply_is_copy_on_write() {
        let state = PipelineState::new("cats");
        let next = state
            .apply(StageName::Content, &CONTENT_FIELDS, content_output())
            .unwrap();

        assert!(state.script().is_none());
        assert_eq!(next.script(), Some("script"));
        assert_eq!(next.current_step(), Some(StageName::Content));
        assert_eq!(next.run_id(), state.run_id());
    }

    #[test]
    fn test_apply_rejects_overwrite() {
        let state = PipelineState::new("cats");
        let err = state
            .apply(StageName::TopicSelection, &[StateField::Topic], StageOutput::new().with_topic("dogs"))
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.message.contains("overwrite topic"));
    }

    #[test]
    fn test_apply_rejects_undeclared_field() {
        let state = PipelineState::new("cats");
        let output = content_output().with_audio_path("/tmp/a.mp3");
        let err = state.apply(StageName::Content, &CONTENT_FIELDS, output).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.message.contains("undeclared field 'audio_path'"));
    }

    #[test]
    fn test_apply_requires_declared_outputs() {
        let state = PipelineState::new("cats");
        let err = state
            .apply(StageName::Voice, &[StateField::AudioPath], StageOutput::new())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Permanent);
        assert_eq!(err.message, "stage 'voice' produced no audio_path");
    }

    #[test]
    fn test_apply_rejects_step_regression() {
        let state = PipelineState::new("cats")
            .apply(StageName::Voice, &[StateField::AudioPath], StageOutput::new().with_audio_path("a.mp3"))
            .unwrap();
        let err = state
            .apply(StageName::Content, &CONTENT_FIELDS, content_output())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_metadata_accumulates_without_overwrite() {
        let state = PipelineState::new("cats")
            .apply(
                StageName::Marketing,
                &[StateField::Metadata],
                StageOutput::new().with_metadata("hashtags", serde_json::json!(["#cats"])),
            )
            .unwrap();

        let published = state
            .apply(
                StageName::Publishing,
                &[StateField::Metadata],
                StageOutput::new().with_metadata("publish_status", serde_json::json!("dry_run")),
            )
            .unwrap();
        assert_eq!(published.metadata().len(), 2);

        let err = state
            .apply(
                StageName::Publishing,
                &[StateField::Metadata],
                StageOutput::new().with_metadata("hashtags", serde_json::json!([])),
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let state = PipelineState::new("cats")
            .fail(StageError::permanent("first"))
            .fail(StageError::transient("second"));

        assert_eq!(state.error().unwrap().message, "first");
    }

    #[test]
    fn test_apply_on_failed_state_is_rejected() {
        let state = PipelineState::new("cats").fail(StageError::cancelled("stop"));
        let err = state
            .apply(StageName::Content, &CONTENT_FIELDS, content_output())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_degraded_stage_recorded() {
        let state = PipelineState::new("cats")
            .apply(StageName::Content, &CONTENT_FIELDS, content_output().degraded())
            .unwrap();
        assert_eq!(state.degraded_stages(), &[StageName::Content]);
    }

    #[test]
    fn test_state_serialize() {
        let state = PipelineState::new("cats");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["topic"], "cats");
        assert!(json.get("error").is_none());

        let back: PipelineState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
