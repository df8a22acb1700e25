//! TGDP Ingest - raw layer loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tgdp_common::env;
use tgdp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tgdp_ingest::config::{DataLakeConfig, DatabaseConfig};
use tgdp_ingest::{LoadSummary, Loader, LoaderOptions, MemoryRawStore, PgRawStore, RawStore};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tgdp-ingest")]
#[command(author, version, about = "Load scraped Telegram messages and YOLO detections into the raw layer")]
struct Cli {
    /// What to load (defaults to everything)
    #[command(subcommand)]
    command: Option<Command>,

    /// Root of the date-partitioned message lake
    #[arg(long, env = "TGDP_MESSAGES_ROOT", global = true)]
    messages_root: Option<PathBuf>,

    /// Root of the flat detection lake
    #[arg(long, env = "TGDP_DETECTIONS_ROOT", global = true)]
    detections_root: Option<PathBuf>,

    /// File name prefix of detection files
    #[arg(long, env = "TGDP_DETECTION_PREFIX", global = true)]
    detection_prefix: Option<String>,

    /// Roll back every file instead of committing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Use an in-memory store instead of Postgres
    #[arg(long, global = true)]
    offline: bool,

    /// Exit non-zero if any single file failed
    #[arg(long, global = true)]
    strict: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create the raw schema and tables, then exit
    Schema,
    /// Load message files only
    Messages,
    /// Load detection files only
    Detections,
    /// Load messages, then detections
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    env::load_dotenv();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Both)
        .log_file_prefix("tgdp-ingest")
        .filter_directives("sqlx=warn")
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

    match run(&cli).await {
        Ok(summary) => {
            if let Some(summary) = summary {
                print_summary(&summary);
                if cli.strict && summary.has_failures() {
                    error!(
                        files_failed = summary.files_failed,
                        "Strict mode: at least one file failed"
                    );
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!(error = %format!("{:#}", e), "Load aborted");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: &Cli) -> Result<Option<LoadSummary>> {
    let mut lake = DataLakeConfig::from_env().context("invalid data lake configuration")?;
    if let Some(root) = &cli.messages_root {
        lake.messages_root = root.clone();
    }
    if let Some(root) = &cli.detections_root {
        lake.detections_root = root.clone();
    }
    if let Some(prefix) = &cli.detection_prefix {
        lake.detection_prefix = prefix.clone();
    }

    let store: Box<dyn RawStore> = if cli.offline {
        warn!("Offline mode: loading into an in-memory store, nothing is persisted");
        Box::new(MemoryRawStore::new())
    } else {
        let db = DatabaseConfig::from_env().context("invalid database configuration")?;
        Box::new(
            PgRawStore::connect(&db)
                .await
                .context("failed to connect to the database")?,
        )
    };

    let options = LoaderOptions {
        progress_every: lake.progress_every,
        dry_run: cli.dry_run,
    };

    // The session is released on every path out of here.
    let result = load(store.as_ref(), options, cli.command.unwrap_or(Command::All), &lake).await;
    store.close().await;
    result
}

async fn load(
    store: &dyn RawStore,
    options: LoaderOptions,
    command: Command,
    lake: &DataLakeConfig,
) -> Result<Option<LoadSummary>> {
    let loader = Loader::new(store, options);
    loader.prepare().await?;

    let summary = match command {
        Command::Schema => {
            info!("Raw schema is ready");
            return Ok(None);
        },
        Command::Messages => loader.load_messages(&lake.messages_root).await?,
        Command::Detections => {
            loader
                .load_detections(&lake.detections_root, &lake.detection_prefix)
                .await?
        },
        Command::All => loader.load_all(lake).await?,
    };

    Ok(Some(summary))
}

fn print_summary(summary: &LoadSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!(
        "Loaded {} new rows{}: {} files committed, {} duplicate files, {} empty, {} failed; {} duplicate records, {} invalid records, {} malformed paths, {} unreadable paths",
        summary.rows_inserted,
        mode,
        summary.files_committed,
        summary.files_duplicate,
        summary.files_empty,
        summary.files_failed,
        summary.rows_duplicate,
        summary.records_invalid,
        summary.malformed_paths,
        summary.unreadable_paths,
    );
    for path in &summary.failed_files {
        println!("  failed: {}", path.display());
    }
}
