//! Run and stage execution contexts.

use crate::cancellation::CancellationToken;
use crate::core::StageName;
use crate::errors::StageError;
use crate::utils::{run_stamp, Timestamp};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Everything scoped to one run: its ID, output directory and cancellation
/// token.
///
/// Every artifact a run writes lives under [`RunScope::run_dir`], which is
/// unique per run, so concurrent runs never share a directory.
#[derive(Debug, Clone)]
pub struct RunScope {
    run_id: Uuid,
    run_dir: PathBuf,
    token: CancellationToken,
}

impl RunScope {
    /// Creates a scope rooted at `<output_root>/runs/<stamp>_<run_id>`.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        output_root: &Path,
        started_at: &Timestamp,
        token: CancellationToken,
    ) -> Self {
        let run_dir = output_root
            .join("runs")
            .join(format!("{}_{run_id}", run_stamp(started_at)));
        Self::at(run_id, run_dir, token)
    }

    /// Creates a scope with an explicit run directory.
    #[must_use]
    pub fn at(run_id: Uuid, run_dir: impl Into<PathBuf>, token: CancellationToken) -> Self {
        Self {
            run_id,
            run_dir: run_dir.into(),
            token,
        }
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the directory reserved for `stage`.
    #[must_use]
    pub fn stage_dir(&self, stage: StageName) -> PathBuf {
        self.run_dir.join(stage.as_str())
    }

    /// Creates a context for one attempt of `stage`.
    #[must_use]
    pub fn stage_context(&self, stage: StageName, attempt: u32) -> StageContext<'_> {
        StageContext {
            scope: self,
            stage,
            attempt,
        }
    }
}

/// Context for a single attempt of a single stage.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    scope: &'a RunScope,
    stage: StageName,
    attempt: u32,
}

impl<'a> StageContext<'a> {
    /// Returns the run scope.
    #[must_use]
    pub fn scope(&self) -> &'a RunScope {
        self.scope
    }

    /// Returns the stage being executed.
    #[must_use]
    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn token(&self) -> &'a CancellationToken {
        &self.scope.token
    }

    /// Returns the stage directory.
    #[must_use]
    pub fn stage_dir(&self) -> PathBuf {
        self.scope.stage_dir(self.stage)
    }

    /// Returns a directory unique to this attempt.
    #[must_use]
    pub fn attempt_dir(&self) -> PathBuf {
        self.stage_dir().join(format!("attempt-{}", self.attempt))
    }

    /// Creates `dir` and its parents.
    ///
    /// # Errors
    ///
    /// Returns a `Permanent` error if the directory cannot be created.
    pub async fn ensure_dir(&self, dir: &Path) -> Result<(), StageError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            StageError::permanent(format!("cannot create {}: {e}", dir.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_run_dir_layout() {
        let run_id = Uuid::nil();
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let scope = RunScope::new(run_id, Path::new("/out"), &started, CancellationToken::new());

        assert_eq!(
            scope.run_dir(),
            Path::new("/out/runs/20240501T120000Z_00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn test_attempt_dirs_are_distinct() {
        let scope = RunScope::at(Uuid::nil(), "/out/run", CancellationToken::new());
        let first = scope.stage_context(StageName::Animation, 1);
        let second = scope.stage_context(StageName::Animation, 2);

        assert_eq!(first.attempt_dir(), Path::new("/out/run/animation/attempt-1"));
        assert_ne!(first.attempt_dir(), second.attempt_dir());
    }

    #[tokio::test]
    async fn test_ensure_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let scope = RunScope::at(Uuid::nil(), tmp.path(), CancellationToken::new());
        let ctx = scope.stage_context(StageName::Voice, 1);

        let dir = ctx.stage_dir();
        ctx.ensure_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }
}
