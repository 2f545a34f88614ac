//! In-process stand-ins for the external collaborators.
//!
//! File-producing fakes write small placeholder files where the real tools
//! would, so path checks downstream behave as they do in production.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    ContentGenerator, FaceAnimator, GeneratedContent, ImageRequest, ImageSource, Interaction,
    ReplyWriter, SpeechSynthesizer,
};
use crate::errors::StageError;

/// A queue of scripted results. The last result repeats once the queue
/// is down to one entry.
#[derive(Debug)]
struct Script<T> {
    results: Mutex<VecDeque<Result<T, StageError>>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(results: impl IntoIterator<Item = Result<T, StageError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Result<T, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock();
        if results.len() > 1 {
            return results
                .pop_front()
                .unwrap_or_else(|| Err(StageError::permanent("script exhausted")));
        }
        results
            .front()
            .cloned()
            .unwrap_or_else(|| Err(StageError::permanent("no scripted result")))
    }
}

/// A content generator returning scripted results in order.
#[derive(Debug)]
pub struct ScriptedContentGenerator {
    script: Script<GeneratedContent>,
}

impl ScriptedContentGenerator {
    /// Creates a generator over `results`.
    #[must_use]
    pub fn new(results: impl IntoIterator<Item = Result<GeneratedContent, StageError>>) -> Self {
        Self {
            script: Script::new(results),
        }
    }

    /// Returns how often content was requested.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for ScriptedContentGenerator {
    async fn generate_text_content(&self, _topic: &str) -> Result<GeneratedContent, StageError> {
        self.script.next()
    }
}

/// A reply writer returning scripted results in order.
#[derive(Debug)]
pub struct ScriptedReplyWriter {
    script: Script<String>,
}

impl ScriptedReplyWriter {
    /// Creates a writer over `results`.
    #[must_use]
    pub fn new(results: impl IntoIterator<Item = Result<String, StageError>>) -> Self {
        Self {
            script: Script::new(results),
        }
    }
}

#[async_trait]
impl ReplyWriter for ScriptedReplyWriter {
    async fn write_reply(&self, _persona: &str, _interaction: &Interaction) -> Result<String, StageError> {
        self.script.next()
    }
}

/// Shared behavior of the file-producing fakes.
#[derive(Debug, Clone, Default)]
struct FakeTool {
    error: Option<StageError>,
    failures_left: Option<Arc<AtomicUsize>>,
    max_delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl FakeTool {
    async fn run(&self) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let Some(err) = &self.error else {
            return Ok(());
        };
        match &self.failures_left {
            None => Err(err.clone()),
            Some(left) => match left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
                Ok(_) => Err(err.clone()),
                Err(_) => Ok(()),
            },
        }
    }
}

async fn write_placeholder(path: &Path, bytes: &[u8]) -> Result<PathBuf, StageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::permanent(e.to_string()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StageError::permanent(e.to_string()))?;
    Ok(path.to_path_buf())
}

macro_rules! fake_tool_builders {
    ($ty:ident) => {
        impl $ty {
            /// Creates a fake that succeeds.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Fails every call with `error`.
            #[must_use]
            pub fn failing_with(mut self, error: StageError) -> Self {
                self.tool.error = Some(error);
                self.tool.failures_left = None;
                self
            }

            /// Fails the first `times` calls with `error`, then succeeds.
            #[must_use]
            pub fn failing_times(mut self, times: usize, error: StageError) -> Self {
                self.tool.error = Some(error);
                self.tool.failures_left = Some(Arc::new(AtomicUsize::new(times)));
                self
            }

            /// Sleeps a random duration up to `max_ms` per call.
            #[must_use]
            pub fn with_random_delay(mut self, max_ms: u64) -> Self {
                self.tool.max_delay_ms = max_ms;
                self
            }

            /// Returns how often the fake was called.
            #[must_use]
            pub fn call_count(&self) -> usize {
                self.tool.calls.load(Ordering::SeqCst)
            }
        }
    };
}

/// Writes a placeholder MP3 where the synthesizer is asked to.
#[derive(Debug, Clone, Default)]
pub struct FakeSpeechSynthesizer {
    tool: FakeTool,
}

fake_tool_builders!(FakeSpeechSynthesizer);

#[async_trait]
impl SpeechSynthesizer for FakeSpeechSynthesizer {
    async fn synthesize_speech(
        &self,
        _text: &str,
        _voice_id: &str,
        output_path: &Path,
    ) -> Result<PathBuf, StageError> {
        self.tool.run().await?;
        write_placeholder(output_path, b"ID3").await
    }
}

/// Writes a placeholder PNG into the request's output directory.
#[derive(Debug, Clone, Default)]
pub struct FakeImageSource {
    tool: FakeTool,
}

fake_tool_builders!(FakeImageSource);

#[async_trait]
impl ImageSource for FakeImageSource {
    async fn acquire_image(&self, request: &ImageRequest<'_>) -> Result<PathBuf, StageError> {
        self.tool.run().await?;
        write_placeholder(&request.output_dir.join("face.png"), b"\x89PNG").await
    }
}

/// Writes a placeholder MP4 into the animation output directory.
#[derive(Debug, Clone, Default)]
pub struct FakeFaceAnimator {
    tool: FakeTool,
}

fake_tool_builders!(FakeFaceAnimator);

#[async_trait]
impl FaceAnimator for FakeFaceAnimator {
    async fn animate_face(
        &self,
        _image_path: &Path,
        _audio_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, StageError> {
        self.tool.run().await?;
        write_placeholder(&output_dir.join("result.mp4"), b"mp4").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[tokio::test]
    async fn test_script_repeats_last_result() {
        let generator = ScriptedContentGenerator::new([
            Err(StageError::transient("busy")),
            Ok(GeneratedContent {
                script: "s".to_string(),
                caption: "c".to_string(),
                image_prompt: "p".to_string(),
            }),
        ]);

        assert_eq!(generator.generate_text_content("x").await.unwrap_err().kind, ErrorKind::Transient);
        assert!(generator.generate_text_content("x").await.is_ok());
        assert!(generator.generate_text_content("x").await.is_ok());
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_is_permanent() {
        let writer = ScriptedReplyWriter::new(Vec::new());
        let interaction = Interaction::new("1", "sam", "hi");
        assert_eq!(
            writer.write_reply("Nova", &interaction).await.unwrap_err().kind,
            ErrorKind::Permanent
        );
    }

    #[tokio::test]
    async fn test_fake_tools_share_call_count_across_clones() {
        let tmp = tempfile::tempdir().unwrap();
        let tts = FakeSpeechSynthesizer::new();
        let clone = tts.clone();

        clone
            .synthesize_speech("hi", "v", &tmp.path().join("a").join("voice.mp3"))
            .await
            .unwrap();
        assert_eq!(tts.call_count(), 1);

        let failing = FakeFaceAnimator::new().failing_with(StageError::transient("gpu busy"));
        let err = failing.animate_face(tmp.path(), tmp.path(), tmp.path()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_failing_times_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voice.mp3");
        let tts = FakeSpeechSynthesizer::new().failing_times(1, StageError::transient("busy"));

        let err = tts.synthesize_speech("hi", "v", &path).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(!path.exists());
        assert_eq!(tts.synthesize_speech("hi", "v", &path).await.unwrap(), path);
        assert_eq!(tts.call_count(), 2);
    }
}
