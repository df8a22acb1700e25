//! Fail-fast stage orchestrator
//!
//! Runs a validated [`StageGraph`] one stage at a time, each to completion
//! before the next starts. The first stage that cannot start, times out or
//! exits non-zero ends the run; nothing after it is started.

use std::path::Path;
use tracing::{error, info, info_span, Instrument};

use crate::dag::StageGraph;
use crate::error::{PipelineError, RunFailure};
use crate::executor::StageExecutor;
use crate::stage::{PipelineRun, StageOutput, StageRun, StageSpec, StageStatus};

/// A stage that did not succeed. `record` is absent when the stage was never
/// started.
struct StageAborted {
    record: Option<StageRun>,
    error: PipelineError,
}

pub struct Orchestrator<E> {
    graph: StageGraph,
    executor: E,
}

impl<E: StageExecutor> Orchestrator<E> {
    pub fn new(stages: Vec<StageSpec>, executor: E) -> Result<Self, PipelineError> {
        Ok(Self {
            graph: StageGraph::new(stages)?,
            executor,
        })
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Stages in the order `run_pipeline` would start them
    pub fn plan(&self) -> Vec<&StageSpec> {
        self.graph.ordered().collect()
    }

    /// Run every stage in dependency order, stopping at the first failure.
    /// On failure the partial run comes back with the error.
    pub async fn run_pipeline(&self) -> Result<PipelineRun, RunFailure> {
        let mut run = PipelineRun::start();
        let span = info_span!("pipeline", run_id = %run.run_id);

        async {
            info!(stages = self.graph.len(), "Pipeline started");

            for stage in self.graph.ordered() {
                match self.execute_stage(stage).await {
                    Ok(record) => run.stages.push(record),
                    Err(StageAborted { record, error }) => {
                        error!(stage = %stage.name, error = %error, "Pipeline aborted; downstream stages will not run");
                        run.stages.extend(record);
                        run.finish();
                        return Err(RunFailure { run, error });
                    },
                }
            }

            run.finish();
            info!(
                stages = run.stages.len(),
                duration_secs = run
                    .finished_at
                    .map(|end| (end - run.started_at).num_milliseconds() as f64 / 1000.0),
                "Pipeline completed successfully"
            );
            Ok(run)
        }
        .instrument(span)
        .await
    }

    /// Run a single stage by name without checking its predecessors.
    pub async fn run_stage(&self, name: &str) -> Result<StageRun, PipelineError> {
        let stage = self
            .graph
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        self.execute_stage(stage).await.map_err(|aborted| aborted.error)
    }

    async fn execute_stage(&self, stage: &StageSpec) -> Result<StageRun, StageAborted> {
        check_preconditions(stage).map_err(|error| StageAborted {
            record: None,
            error,
        })?;

        info!(stage = %stage.name, command = %stage.command_line(), "Stage started");
        let mut record = StageRun::start(&stage.name);

        let output = match self.executor.execute(stage).await {
            Ok(output) => output,
            Err(error) => {
                error!(stage = %stage.name, error = %error, "Stage failed");
                record.finish(StageStatus::Failed, &StageOutput::default());
                return Err(StageAborted {
                    record: Some(record),
                    error,
                });
            },
        };

        if output.success() {
            record.finish(StageStatus::Succeeded, &output);
            info!(
                stage = %stage.name,
                duration_secs = record.duration_secs(),
                stdout = %output.stdout.trim_end(),
                "Stage succeeded"
            );
            return Ok(record);
        }

        record.finish(StageStatus::Failed, &output);
        error!(
            stage = %stage.name,
            exit_code = ?output.exit_code,
            duration_secs = record.duration_secs(),
            stdout = %output.stdout.trim_end(),
            stderr = %output.stderr.trim_end(),
            "Stage failed"
        );

        Err(StageAborted {
            record: Some(record),
            error: PipelineError::StageFailed {
                stage: stage.name.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            },
        })
    }
}

fn check_preconditions(stage: &StageSpec) -> Result<(), PipelineError> {
    for path in &stage.requires {
        if !Path::new(path).exists() {
            error!(stage = %stage.name, path = %path.display(), "Required path is missing");
            return Err(PipelineError::Precondition {
                stage: stage.name.clone(),
                path: path.clone(),
                reason: "does not exist".to_string(),
            });
        }
    }
    Ok(())
}
