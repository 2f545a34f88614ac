//! Application configuration.
//!
//! Settings come from an optional JSON file; credentials and a few path
//! overrides come from the environment. Every section has defaults, so an
//! empty file or no file at all yields a working offline configuration.

use crate::adapters::{DeviceMode, PreprocessMode};
use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable holding the Pexels API key.
pub const PEXELS_API_KEY: &str = "PEXELS_API_KEY";
/// Environment variable pointing at the SadTalker checkout.
pub const SADTALKER_PATH: &str = "SADTALKER_PATH";
/// Environment variable pointing at the SadTalker checkpoints.
pub const SADTALKER_CHECKPOINT_PATH: &str = "SADTALKER_CHECKPOINT_PATH";
/// Environment variable overriding the output root.
pub const OUTPUT_DIR: &str = "CLIPFLOW_OUTPUT_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Who the content is for and from.
    #[serde(alias = "influencer")]
    pub persona: PersonaConfig,
    /// Text generation settings.
    pub content: ContentConfig,
    /// Speech synthesis settings.
    pub voice: VoiceConfig,
    /// Face image settings.
    #[serde(alias = "avatar")]
    pub visual: VisualConfig,
    /// Face animation settings.
    pub animation: AnimationConfig,
    /// Retry settings shared by every stage.
    pub retry: RetryConfig,
    /// Output locations.
    pub output: OutputConfig,
    /// Run limits.
    pub run: RunConfig,
}

/// Persona settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Display name.
    pub name: String,
    /// Content niche, used for trend analysis.
    pub niche: String,
    /// Tone of voice.
    pub content_style: String,
    /// Target platforms.
    pub platforms: Vec<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Nova".to_string(),
            niche: "Technology & AI".to_string(),
            content_style: "Flirty, mischievous, confident".to_string(),
            platforms: vec!["instagram".to_string(), "tiktok".to_string()],
        }
    }
}

/// Gemini settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Model name.
    pub model: String,
    /// API base URL.
    pub base_url: String,
    /// Sampling temperature for script writing.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// API key, from `GEMINI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-flash-latest".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
            api_key: None,
        }
    }
}

/// edge-tts settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// The edge-tts executable.
    pub binary: PathBuf,
    /// Voice ID.
    pub voice_id: String,
    /// Timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("edge-tts"),
            voice_id: "en-US-AriaNeural".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Face image settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// A face image on disk.
    pub image_path: Option<PathBuf>,
    /// Search Pexels for an image instead of using `image_path`.
    pub stock_search: bool,
    /// Pexels orientation filter.
    pub orientation: String,
    /// Pexels API base URL.
    pub pexels_base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// API key, from `PEXELS_API_KEY`.
    #[serde(skip_serializing)]
    pub pexels_api_key: Option<String>,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            stock_search: false,
            orientation: "portrait".to_string(),
            pexels_base_url: "https://api.pexels.com".to_string(),
            timeout_secs: 30,
            pexels_api_key: None,
        }
    }
}

/// SadTalker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// SadTalker checkout, from `SADTALKER_PATH`.
    pub sadtalker_path: Option<PathBuf>,
    /// Checkpoint directory, from `SADTALKER_CHECKPOINT_PATH`.
    pub checkpoint_dir: Option<PathBuf>,
    /// Python interpreter.
    pub python: PathBuf,
    /// Compute device.
    pub device: DeviceMode,
    /// Face preprocessing mode.
    pub preprocess: PreprocessMode,
    /// Keep head pose still.
    pub still: bool,
    /// Timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            sadtalker_path: None,
            checkpoint_dir: None,
            python: PathBuf::from("python"),
            device: DeviceMode::Auto,
            preprocess: PreprocessMode::Crop,
            still: true,
            timeout_secs: 1800,
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root for run directories and run records.
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
        }
    }
}

impl OutputConfig {
    /// Directory for per-run artifacts.
    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Directory for run records.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Run limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Cancel a run after this many seconds.
    pub deadline_secs: Option<u64>,
    /// Runs executed at once in batch mode.
    pub batch_concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: None,
            batch_concurrency: 2,
        }
    }
}

impl RunConfig {
    /// Returns the deadline as a duration.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Loads the config file at `path`, or defaults when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file exists but cannot be read
    /// and [`ConfigError::Parse`] if it is not valid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Loads the file, applies the process environment and validates.
    ///
    /// # Errors
    ///
    /// Returns any error from [`AppConfig::load`] or [`AppConfig::validate`].
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies credentials and overrides from `lookup`.
    ///
    /// Empty values and unfilled placeholders (`your_…`) are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !v.starts_with("your_"))
        };

        if let Some(key) = get(GEMINI_API_KEY) {
            self.content.api_key = Some(key);
        }
        if let Some(key) = get(PEXELS_API_KEY) {
            self.visual.pexels_api_key = Some(key);
        }
        if let Some(path) = get(SADTALKER_PATH) {
            self.animation.sadtalker_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get(SADTALKER_CHECKPOINT_PATH) {
            self.animation.checkpoint_dir = Some(PathBuf::from(path));
        }
        if let Some(path) = get(OUTPUT_DIR) {
            self.output.root = PathBuf::from(path);
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;

        if !(0.0..=2.0).contains(&self.content.temperature) {
            return Err(invalid("content.temperature", "must be between 0.0 and 2.0"));
        }
        for (field, secs) in [
            ("content.timeout_secs", self.content.timeout_secs),
            ("voice.timeout_secs", self.voice.timeout_secs),
            ("visual.timeout_secs", self.visual.timeout_secs),
            ("animation.timeout_secs", self.animation.timeout_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.run.batch_concurrency == 0 {
            return Err(invalid("run.batch_concurrency", "must be at least 1"));
        }
        if self.voice.voice_id.trim().is_empty() {
            return Err(invalid("voice.voice_id", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
