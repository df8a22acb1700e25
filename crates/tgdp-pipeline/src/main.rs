//! TGDP - pipeline runner

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tgdp_common::env;
use tgdp_common::logging::{init_logging, LogConfig, LogLevel};
use tgdp_pipeline::schedule::{parse_daily_time, run_daily};
use tgdp_pipeline::{Orchestrator, PipelineConfig, ProcessExecutor};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tgdp")]
#[command(author, version, about = "Run the Telegram data pipeline: acquire, enrich, load, transform")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file defining the stages (replaces the default chain)
    #[arg(long, env = "TGDP_PIPELINE_FILE", global = true)]
    pipeline_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage in dependency order
    Run,
    /// Run one stage on its own, without running its predecessors
    Stage {
        /// Stage name, e.g. load
        name: String,
    },
    /// Print the resolved execution order
    Plan,
    /// Run the pipeline every day at a UTC time until interrupted
    Schedule {
        /// Wall time in UTC, HH:MM
        #[arg(long, default_value = "00:00")]
        at: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env::load_dotenv();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("tgdp")
        .build();

    let log_config = match log_config.merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid logging configuration: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialise logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn execute(cli: &Cli) -> Result<()> {
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let stages = match &cli.pipeline_file {
        Some(path) => config
            .load_stages(path)
            .with_context(|| format!("cannot load pipeline file {}", path.display()))?,
        None => config.default_stages(),
    };

    let mut executor = ProcessExecutor::new()
        .with_default_timeout(config.stage_timeout_secs.map(Duration::from_secs));
    if let Some(dir) = &config.workdir {
        executor = executor.with_workdir(dir);
    }

    let orchestrator = Orchestrator::new(stages, executor)?;

    match &cli.command {
        Command::Run => {
            let run = orchestrator.run_pipeline().await?;
            println!("Pipeline run {} succeeded ({} stages)", run.run_id, run.stages.len());
        },
        Command::Stage { name } => {
            let record = orchestrator.run_stage(name).await?;
            println!("Stage '{}' {} in {:.1}s", record.name, record.status, record.duration_secs());
        },
        Command::Plan => {
            for (position, stage) in orchestrator.plan().iter().enumerate() {
                let after = if stage.after.is_empty() {
                    String::new()
                } else {
                    format!("  (after {})", stage.after.join(", "))
                };
                println!("{}. {}: {}{}", position + 1, stage.name, stage.command_line(), after);
            }
        },
        Command::Schedule { at } => {
            let at = parse_daily_time(at)
                .with_context(|| format!("invalid --at '{}', expected HH:MM", at))?;
            info!(at = %at, "Daily schedule started (UTC)");

            let orchestrator = &orchestrator;
            run_daily(at, shutdown_signal(), move || async move {
                match orchestrator.run_pipeline().await {
                    Ok(run) => info!(run_id = %run.run_id, "Scheduled run succeeded"),
                    Err(failure) => error!(
                        run_id = %failure.run.run_id,
                        error = %failure.error,
                        "Scheduled run failed; waiting for next run"
                    ),
                }
            })
            .await;
        },
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, stopping schedule");
}
