//! Face animation through a local SadTalker checkout.

use super::{FaceAnimator, ToolCommand};
use crate::config::AnimationConfig;
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Script SadTalker is driven through.
const INFERENCE_SCRIPT: &str = "inference.py";

/// Extensions recognized as SadTalker output.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "webm", "mkv", "avi"];

/// Compute device used by SadTalker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Use CUDA when an NVIDIA driver is present.
    #[default]
    Auto,
    /// Force CPU inference.
    Cpu,
    /// Force CUDA inference.
    Cuda,
}

impl DeviceMode {
    /// Returns the mode as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Resolves `Auto` against the host.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => detect_device(),
            other => other,
        }
    }
}

/// How SadTalker crops the source face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    /// Crop to the face.
    #[default]
    Crop,
    /// Resize the whole image.
    Resize,
    /// Animate the face and paste it back into the full image.
    Full,
}

impl PreprocessMode {
    /// Returns the value passed to `--preprocess`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Resize => "resize",
            Self::Full => "full",
        }
    }
}

/// Returns `Cuda` if `nvidia-smi` is on the `PATH`, `Cpu` otherwise.
#[must_use]
pub fn detect_device() -> DeviceMode {
    if which::which("nvidia-smi").is_ok() {
        DeviceMode::Cuda
    } else {
        DeviceMode::Cpu
    }
}

/// Runs SadTalker's `inference.py` and locates the video it wrote.
#[derive(Debug, Clone)]
pub struct SadTalkerAnimator {
    root: PathBuf,
    python: PathBuf,
    checkpoint_dir: Option<PathBuf>,
    device: DeviceMode,
    preprocess: PreprocessMode,
    still: bool,
    timeout: Duration,
}

impl SadTalkerAnimator {
    /// Creates an animator for the configured checkout.
    ///
    /// # Errors
    ///
    /// `Configuration` if no checkout is configured or it has no
    /// `inference.py`.
    pub fn new(config: &AnimationConfig) -> Result<Self, StageError> {
        let root = config.sadtalker_path.clone().ok_or_else(|| {
            StageError::configuration("SADTALKER_PATH not set")
        })?;
        if !root.join(INFERENCE_SCRIPT).is_file() {
            return Err(StageError::configuration(format!(
                "no {INFERENCE_SCRIPT} in {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            python: config.python.clone(),
            checkpoint_dir: config.checkpoint_dir.clone(),
            device: config.device.resolve(),
            preprocess: config.preprocess,
            still: config.still,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Returns the resolved device.
    #[must_use]
    pub fn device(&self) -> DeviceMode {
        self.device
    }

    /// Builds the inference command. Paths must already be absolute since
    /// the tool runs from the checkout.
    #[must_use]
    pub fn command(&self, image_path: &Path, audio_path: &Path, result_dir: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.python);
        cmd.arg(INFERENCE_SCRIPT)
            .arg("--driven_audio")
            .path_arg(audio_path)
            .arg("--source_image")
            .path_arg(image_path)
            .arg("--result_dir")
            .path_arg(result_dir);
        if self.still {
            cmd.arg("--still");
        }
        cmd.arg("--preprocess").arg(self.preprocess.as_str());
        if self.device == DeviceMode::Cpu {
            cmd.arg("--cpu");
        }
        if let Some(ref checkpoints) = self.checkpoint_dir {
            cmd.arg("--checkpoint_dir").path_arg(checkpoints);
        }
        cmd.current_dir(&self.root).timeout(self.timeout);
        cmd
    }
}

#[async_trait]
impl FaceAnimator for SadTalkerAnimator {
    async fn animate_face(
        &self,
        image_path: &Path,
        audio_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, StageError> {
        let image = absolute(image_path).await?;
        let audio = absolute(audio_path).await?;
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            StageError::permanent(format!("cannot create {}: {e}", output_dir.display()))
        })?;
        let result_dir = absolute(output_dir).await?;

        info!(
            device = self.device.as_str(),
            preprocess = self.preprocess.as_str(),
            "animating face"
        );
        self.command(&image, &audio, &result_dir).execute().await?;

        let dir = result_dir.clone();
        tokio::task::spawn_blocking(move || newest_media_file(&dir))
            .await
            .map_err(|e| StageError::permanent(format!("video search failed: {e}")))?
    }
}

async fn absolute(path: &Path) -> Result<PathBuf, StageError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| StageError::permanent(format!("cannot resolve {}: {e}", path.display())))
}

/// Returns the most recently modified video under `dir`, searching
/// subdirectories. Ties on modification time go to the greater path.
///
/// # Errors
///
/// `Permanent` if the directory holds no video.
pub fn newest_media_file(dir: &Path) -> Result<PathBuf, StageError> {
    let newest = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.into_path()))
        })
        .max();

    match newest {
        Some((_, path)) => {
            debug!(path = %path.display(), "found generated video");
            Ok(path)
        }
        None => Err(StageError::permanent(format!(
            "no video found in {}",
            dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};

    fn checkout() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(INFERENCE_SCRIPT), "").unwrap();
        tmp
    }

    fn config(root: &Path, device: DeviceMode) -> AnimationConfig {
        AnimationConfig {
            sadtalker_path: Some(root.to_path_buf()),
            device,
            ..AnimationConfig::default()
        }
    }

    #[test]
    fn test_missing_path_is_configuration() {
        let err = SadTalkerAnimator::new(&AnimationConfig::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert_eq!(err.message, "SADTALKER_PATH not set");
    }

    #[test]
    fn test_missing_script_is_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SadTalkerAnimator::new(&config(tmp.path(), DeviceMode::Cpu)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_cpu_command() {
        let root = checkout();
        let animator = SadTalkerAnimator::new(&config(root.path(), DeviceMode::Cpu)).unwrap();
        let cmd = animator.command(
            Path::new("/data/face.png"),
            Path::new("/data/voice.mp3"),
            Path::new("/data/out"),
        );

        assert_eq!(
            cmd.get_args(),
            [
                "inference.py",
                "--driven_audio",
                "/data/voice.mp3",
                "--source_image",
                "/data/face.png",
                "--result_dir",
                "/data/out",
                "--still",
                "--preprocess",
                "crop",
                "--cpu",
            ]
        );
    }

    #[test]
    fn test_cuda_command_with_checkpoints() {
        let root = checkout();
        let mut cfg = config(root.path(), DeviceMode::Cuda);
        cfg.checkpoint_dir = Some(PathBuf::from("/models"));
        cfg.preprocess = PreprocessMode::Full;
        cfg.still = false;
        let animator = SadTalkerAnimator::new(&cfg).unwrap();
        let cmd = animator.command(Path::new("/i.png"), Path::new("/a.mp3"), Path::new("/o"));

        let args = cmd.get_args();
        assert!(!args.contains(&"--cpu".to_string()));
        assert!(!args.contains(&"--still".to_string()));
        assert_eq!(
            &args[args.len() - 4..],
            ["--preprocess", "full", "--checkpoint_dir", "/models"]
        );
    }

    #[test]
    fn test_newest_media_file_picks_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("2024_01_01");
        fs::create_dir_all(&nested).unwrap();

        let old = tmp.path().join("old.mp4");
        let new = nested.join("new.mp4");
        File::create(&old).unwrap();
        File::create(&new).unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let earlier = SystemTime::now() - Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        assert_eq!(newest_media_file(tmp.path()).unwrap(), new);
    }

    #[test]
    fn test_newest_media_file_empty_dir_is_permanent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("log.txt"), "no video").unwrap();

        let err = newest_media_file(tmp.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_mode_serde() {
        let mode: DeviceMode = serde_json::from_str("\"cuda\"").unwrap();
        assert_eq!(mode, DeviceMode::Cuda);
        assert_eq!(DeviceMode::Cpu.resolve(), DeviceMode::Cpu);
        assert_eq!(PreprocessMode::Resize.as_str(), "resize");
    }
}
