//! TGDP Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Runs the platform's batch stages as a small dependency graph of external
//! commands:
//!
//! ```text
//! acquire -> enrich -> load -> transform
//! ```
//!
//! Stages run one at a time. The first stage that fails ends the run, and its
//! exit code and captured output are carried in the returned error.
//!
//! # Example
//!
//! ```no_run
//! use tgdp_pipeline::{Orchestrator, PipelineConfig, ProcessExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let orchestrator = Orchestrator::new(config.default_stages(), ProcessExecutor::new())?;
//!     let run = orchestrator.run_pipeline().await?;
//!     println!("run {} finished", run.run_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod schedule;
pub mod stage;

pub use config::PipelineConfig;
pub use dag::{GraphError, StageGraph};
pub use error::{PipelineError, RunFailure};
pub use executor::{ProcessExecutor, StageExecutor};
pub use orchestrator::Orchestrator;
pub use stage::{PipelineRun, StageOutput, StageRun, StageSpec, StageStatus};
