//! Pipeline error types

use std::path::PathBuf;
use thiserror::Error;

use crate::dag::GraphError;
use crate::stage::PipelineRun;

/// Everything that can stop a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline definition: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// A resource the stage needs is absent; the stage was not started
    #[error("stage '{stage}' precondition failed: {} {reason}", .path.display())]
    Precondition {
        stage: String,
        path: PathBuf,
        reason: String,
    },

    #[error("stage '{stage}' could not be started ({program}): {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{stage}' timed out after {secs}s and was killed")]
    Timeout { stage: String, secs: u64 },

    /// The stage ran and exited non-zero. Output is kept verbatim.
    #[error("stage '{stage}' failed with {}: {}", describe_exit(.exit_code), diagnostic(.stdout, .stderr))]
    StageFailed {
        stage: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl PipelineError {
    /// Name of the stage the error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Precondition { stage, .. }
            | PipelineError::Spawn { stage, .. }
            | PipelineError::Timeout { stage, .. }
            | PipelineError::StageFailed { stage, .. } => Some(stage),
            PipelineError::UnknownStage(_) | PipelineError::InvalidGraph(_) => None,
        }
    }
}

/// A pipeline run that stopped early. `run` holds the record of every stage
/// that was started, the failed one last.
#[derive(Error, Debug)]
#[error("pipeline run {} aborted", .run.run_id)]
pub struct RunFailure {
    pub run: PipelineRun,
    #[source]
    pub error: PipelineError,
}

impl RunFailure {
    pub fn stage(&self) -> Option<&str> {
        self.error.stage()
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn diagnostic(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if stdout.is_empty() {
        "no output".to_string()
    } else {
        stdout.to_string()
    }
}
