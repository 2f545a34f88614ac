//! Persisted run records.
//!
//! One JSON file per run under `<output_root>/logs/`, named
//! `<stamp>_<run_id>.json` so a directory listing sorts by start time.

use crate::core::{StageName, StageTrace};
use crate::errors::{ClipflowError, StageError};
use crate::pipeline::RunReport;
use crate::utils::{run_stamp, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Files produced by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    /// Synthesized voice-over.
    pub audio_path: Option<PathBuf>,
    /// Face image.
    pub image_path: Option<PathBuf>,
    /// Final video.
    pub video_path: Option<PathBuf>,
}

/// Everything worth keeping about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run ID.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Run topic.
    pub topic: Option<String>,
    /// Spoken script.
    pub script: Option<String>,
    /// Post caption.
    pub caption: Option<String>,
    /// Image prompt.
    pub image_prompt: Option<String>,
    /// Produced files.
    pub artifacts: Artifacts,
    /// Accumulated metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Last stage that committed.
    pub current_step: Option<StageName>,
    /// Stages whose output came from fallback content.
    #[serde(default)]
    pub degraded_stages: Vec<StageName>,
    /// Terminal error, if the run failed.
    pub error: Option<StageError>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
    /// Total duration in milliseconds.
    pub duration_ms: f64,
    /// Per-stage trace.
    pub trace: Vec<StageTrace>,
}

impl RunRecord {
    /// Builds a record from a run report.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        let state = &report.state;
        Self {
            run_id: state.run_id(),
            pipeline: report.pipeline.clone(),
            topic: state.topic().map(str::to_string),
            script: state.script().map(str::to_string),
            caption: state.caption().map(str::to_string),
            image_prompt: state.image_prompt().map(str::to_string),
            artifacts: Artifacts {
                audio_path: state.audio_path().map(Path::to_path_buf),
                image_path: state.image_path().map(Path::to_path_buf),
                video_path: state.video_path().map(Path::to_path_buf),
            },
            metadata: state.metadata().clone(),
            current_step: state.current_step(),
            degraded_stages: state.degraded_stages().to_vec(),
            error: state.error().cloned(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            duration_ms: report.duration_ms,
            trace: report.trace.clone(),
        }
    }

    /// Returns the file name the record is saved under.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}.json", run_stamp(&self.started_at), self.run_id)
    }

    /// Writes the record into `logs_dir` and returns its path.
    ///
    /// This is a plain blocking write.
    pub fn save(&self, logs_dir: &Path) -> Result<PathBuf, ClipflowError> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        info!(path = %path.display(), run_id = %self.run_id, "saved run record");
        Ok(path)
    }

    /// Reads a record back.
    pub fn load(path: &Path) -> Result<Self, ClipflowError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineState, StageOutput, StageStatus, StateField};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn report() -> RunReport {
        let state = PipelineState::new("cats")
            .apply(
                StageName::Content,
                &[StateField::Script],
                StageOutput::new().with_script("Cats are liquid.").degraded(),
            )
            .unwrap();
        let mut trace = StageTrace::new("content");
        trace.start();
        trace.succeed();

        RunReport {
            pipeline: "content".to_string(),
            state,
            trace: vec![trace, StageTrace::new("voice")],
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 2).unwrap(),
            duration_ms: 2000.0,
        }
    }

    #[test]
    fn test_from_report() {
        let report = report();
        let record = RunRecord::from_report(&report);

        assert_eq!(record.topic.as_deref(), Some("cats"));
        assert_eq!(record.script.as_deref(), Some("Cats are liquid."));
        assert_eq!(record.current_step, Some(StageName::Content));
        assert_eq!(record.degraded_stages, vec![StageName::Content]);
        assert_eq!(record.trace[1].status, StageStatus::NotStarted);
        assert_eq!(
            record.file_name(),
            format!("20240501T093000Z_{}.json", report.state.run_id())
        );
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let record = RunRecord::from_report(&report());

        let path = record.save(&tmp.path().join("logs")).unwrap();
        assert!(path.starts_with(tmp.path().join("logs")));

        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert_eq!(loaded.script, record.script);
        assert_eq!(loaded.trace.len(), 2);
    }
}
