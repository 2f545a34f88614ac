//! Error types for the clipflow pipeline.
//!
//! Stage failures are plain data ([`StageError`]) because they travel inside
//! the pipeline state and the persisted run record. Wiring and setup problems
//! use ordinary error enums and are returned to the caller.

use crate::core::StageName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for clipflow setup and I/O operations.
#[derive(Debug, Error)]
pub enum ClipflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A configuration file could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage failure surfaced outside the runner.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a stage or adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing credentials or binaries. Never retried.
    Configuration,
    /// Rate limiting, timeouts, flaky connections. Retried with backoff.
    Transient,
    /// Bad input, non-zero tool exit, missing artifact. Never retried.
    Permanent,
    /// A stage's required input was missing on entry.
    Precondition,
    /// The run-scoped cancellation token fired.
    Cancelled,
    /// A stage tried to overwrite an artifact or write an undeclared field.
    Conflict,
}

impl ErrorKind {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if fallback content may stand in for the failed call.
    ///
    /// Cancellation and wiring errors always terminate the run.
    #[must_use]
    pub fn allows_fallback(self) -> bool {
        matches!(self, Self::Configuration | Self::Transient | Self::Permanent)
    }

    /// Returns the stable string form used in records and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::Transient => "transient_error",
            Self::Permanent => "permanent_error",
            Self::Precondition => "precondition_error",
            Self::Cancelled => "cancelled_error",
            Self::Conflict => "conflict_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured stage failure: kind, message and optional diagnostic payload.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    /// The failure classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Extra diagnostic output, e.g. captured stderr of an external tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// The stage the failure was attached to, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostic: None,
            stage: None,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Attaches a diagnostic payload.
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Attaches the stage name, keeping an existing one.
    #[must_use]
    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage.get_or_insert(stage);
        self
    }

    /// Returns true if this is a retryable failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind.as_str()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref diagnostic) = self.diagnostic {
            map.insert("diagnostic".to_string(), serde_json::json!(diagnostic));
        }
        if let Some(stage) = self.stage {
            map.insert("stage".to_string(), serde_json::json!(stage.as_str()));
        }
        map
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-MISSING_INPUT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a pipeline definition is rejected at build time.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// The config path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for [`crate::config::AppConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// The config path.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_kind_fallback() {
        assert!(ErrorKind::Configuration.allows_fallback());
        assert!(ErrorKind::Permanent.allows_fallback());
        assert!(!ErrorKind::Cancelled.allows_fallback());
        assert!(!ErrorKind::Precondition.allows_fallback());
        assert!(!ErrorKind::Conflict.allows_fallback());
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::permanent("tool exited with status 2");
        assert_eq!(err.to_string(), "permanent_error: tool exited with status 2");
    }

    #[test]
    fn test_stage_error_keeps_first_stage() {
        let err = StageError::transient("slow")
            .with_stage(StageName::Voice)
            .with_stage(StageName::Animation);
        assert_eq!(err.stage, Some(StageName::Voice));
    }

    #[test]
    fn test_stage_error_to_dict() {
        let err = StageError::permanent("boom")
            .with_diagnostic("stderr text")
            .with_stage(StageName::Animation);
        let dict = err.to_dict();

        assert_eq!(dict.get("kind").unwrap(), "permanent_error");
        assert_eq!(dict.get("diagnostic").unwrap(), "stderr text");
        assert_eq!(dict.get("stage").unwrap(), "animation");
    }

    #[test]
    fn test_stage_error_serde() {
        let err = StageError::configuration("GEMINI_API_KEY not set");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""kind":"configuration""#));
        assert!(!json.contains("diagnostic"));

        let back: StageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("empty")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-EMPTY", "empty"));
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
    }
}
