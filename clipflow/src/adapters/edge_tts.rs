//! Speech synthesis through the `edge-tts` command-line tool.

use super::{SpeechSynthesizer, ToolCommand};
use crate::config::VoiceConfig;
use crate::errors::StageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Runs `edge-tts --voice <id> --text <text> --write-media <path>`.
#[derive(Debug, Clone)]
pub struct EdgeTtsSynthesizer {
    binary: PathBuf,
    timeout: Duration,
}

impl EdgeTtsSynthesizer {
    /// Creates a synthesizer from config.
    #[must_use]
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Builds the command for one synthesis.
    #[must_use]
    pub fn command(&self, text: &str, voice_id: &str, output_path: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.binary);
        cmd.arg("--voice")
            .arg(voice_id)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .path_arg(output_path)
            .timeout(self.timeout);
        cmd
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsSynthesizer {
    async fn synthesize_speech(
        &self,
        text: &str,
        voice_id: &str,
        output_path: &Path,
    ) -> Result<PathBuf, StageError> {
        if text.trim().is_empty() {
            return Err(StageError::permanent("no text to synthesize"));
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StageError::permanent(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        match tokio::fs::remove_file(output_path).await {
            Ok(()) => debug!(path = %output_path.display(), "removed stale audio"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StageError::permanent(format!(
                    "cannot clear {}: {e}",
                    output_path.display()
                )))
            }
        }

        info!(voice = voice_id, chars = text.len(), "synthesizing speech");
        self.command(text, voice_id, output_path).execute().await?;

        match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.len() > 0 => Ok(output_path.to_path_buf()),
            _ => Err(StageError::permanent(format!(
                "edge-tts wrote no audio to {}",
                output_path.display()
            ))),
        }
    }
}
