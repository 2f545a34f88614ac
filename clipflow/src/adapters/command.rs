//! Builder for executing external tool commands with timeout support.

use crate::errors::StageError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default command timeout: 10 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest stderr tail kept as an error diagnostic.
const DIAGNOSTIC_LIMIT: usize = 4000;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is killed when the returned future is dropped, so a cancelled
/// or timed-out run never leaves the tool running.
///
/// # Example
///
/// ```no_run
/// use clipflow::adapters::ToolCommand;
///
/// # async fn example() -> Result<(), clipflow::errors::StageError> {
/// let output = ToolCommand::new("edge-tts")
///     .arg("--list-voices")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append a path argument.
    pub fn path_arg(&mut self, path: &Path) -> &mut Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Run the tool from `dir`.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Returns the arguments collected so far.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the program cannot be found.
    /// - `Transient` if the process times out.
    /// - `Permanent` if spawning fails for another reason or the process
    ///   exits with a non-zero status; stderr becomes the diagnostic.
    pub async fn execute(&self) -> Result<ToolOutput, StageError> {
        let program_name = self.program_name();
        let program = self.resolve_program(&program_name)?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        debug!(tool = %program_name, path = %program.display(), args = ?self.args, "spawning tool");

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StageError::configuration(format!("{program_name} not found: {e}"))
            } else {
                StageError::permanent(format!("{program_name} failed to spawn: {e}"))
            }
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(StageError::permanent(format!(
                    "I/O error waiting for {program_name}: {e}"
                )))
            }
            Err(_elapsed) => {
                return Err(StageError::transient(format!(
                    "{program_name} timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(StageError::permanent(format!(
                "{program_name} exited with {}",
                output.status
            ))
            .with_diagnostic(tail(tool_output.stderr.trim(), DIAGNOSTIC_LIMIT)));
        }

        Ok(tool_output)
    }

    /// Looks bare program names up on `PATH`. Paths are spawned as given.
    fn resolve_program(&self, program_name: &str) -> Result<PathBuf, StageError> {
        if self.program.components().count() > 1 {
            return Ok(self.program.clone());
        }
        which::which(&self.program)
            .map_err(|e| StageError::configuration(format!("{program_name} not found on PATH: {e}")))
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map_or_else(
                || self.program.to_string_lossy(),
                |name| name.to_string_lossy(),
            )
            .into_owned()
    }
}

fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
