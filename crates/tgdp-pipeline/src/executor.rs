//! Stage invocation
//!
//! [`StageExecutor`] is the seam between the orchestrator and the outside
//! world. [`ProcessExecutor`] runs a stage as a child process and waits for it
//! to exit before returning.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::PipelineError;
use crate::stage::{StageOutput, StageSpec};

#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage to completion and report its exit code and output.
    ///
    /// A non-zero exit is a normal return; only failures to start or to
    /// finish in time are errors.
    async fn execute(&self, stage: &StageSpec) -> Result<StageOutput, PipelineError>;
}

/// Runs stages as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    workdir: Option<PathBuf>,
    default_timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working directory for stages that do not set their own
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn command(&self, stage: &StageSpec) -> Command {
        let mut command = Command::new(&stage.program);
        command
            .args(&stage.args)
            .envs(&stage.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = stage.current_dir.as_ref().or(self.workdir.as_ref()) {
            command.current_dir(dir);
        }

        command
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(&self, stage: &StageSpec) -> Result<StageOutput, PipelineError> {
        let timeout = stage
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.default_timeout);

        debug!(
            stage = %stage.name,
            command = %stage.command_line(),
            timeout_secs = timeout.map(|t| t.as_secs()),
            "Spawning stage process"
        );

        let mut command = self.command(stage);
        let output = command.output();

        // Dropping the `output` future on timeout kills the child.
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| PipelineError::Timeout {
                    stage: stage.name.clone(),
                    secs: limit.as_secs(),
                })?,
            None => output.await,
        };

        let output = output.map_err(|source| PipelineError::Spawn {
            stage: stage.name.clone(),
            program: stage.program.clone(),
            source,
        })?;

        Ok(StageOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> StageSpec {
        StageSpec::new(name, "sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let output = ProcessExecutor::new()
            .execute(&sh("acquire", "echo scraped; echo warn >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "scraped");
        assert_eq!(output.stderr.trim(), "warn");
    }

    #[tokio::test]
    async fn test_stage_env_and_workdir() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = ProcessExecutor::new()
            .with_workdir(dir.path())
            .execute(&sh("transform", "printf '%s' \"$DBT_PROFILES_DIR\"; pwd").env("DBT_PROFILES_DIR", "."))
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.starts_with('.'));
        let expected = dir.path().canonicalize().unwrap();
        let reported = std::path::PathBuf::from(output.stdout[1..].trim())
            .canonicalize()
            .unwrap();
        assert_eq!(reported, expected);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = ProcessExecutor::new()
            .execute(&StageSpec::new("acquire", "/nonexistent/tgdp-scraper"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_stage() {
        let err = ProcessExecutor::new()
            .execute(&sh("enrich", "sleep 5").timeout_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { secs: 1, .. }));
    }
}
