//! End-to-end runs of TOML-defined pipelines with real child processes

#![cfg(unix)]

use std::fs;
use tempfile::TempDir;
use tgdp_pipeline::{Orchestrator, PipelineConfig, PipelineError, ProcessExecutor, StageStatus};

fn write_pipeline(dir: &TempDir, enrich_exit: i32) -> std::path::PathBuf {
    let file = dir.path().join("pipeline.toml");
    let body = format!(
        r#"
[[stage]]
name = "acquire"
program = "sh"
args = ["-c", "echo acquire >> trace"]

[[stage]]
name = "enrich"
program = "sh"
args = ["-c", "echo enrich >> trace; echo 'model weights missing' >&2; exit {enrich_exit}"]
after = ["acquire"]

[[stage]]
name = "load"
program = "sh"
args = ["-c", "echo load >> trace"]
after = ["enrich"]

[[stage]]
name = "transform"
program = "sh"
args = ["-c", "echo transform >> trace"]
after = ["load"]
requires = ["telegram_dbt_project"]
"#
    );
    fs::write(&file, body).unwrap();
    file
}

fn orchestrator(dir: &TempDir, enrich_exit: i32) -> Orchestrator<ProcessExecutor> {
    let config = PipelineConfig {
        workdir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let stages = config
        .load_stages(&write_pipeline(dir, enrich_exit))
        .unwrap();
    Orchestrator::new(stages, ProcessExecutor::new().with_workdir(dir.path())).unwrap()
}

fn trace(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("trace"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_full_chain_runs_in_order() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("telegram_dbt_project")).unwrap();

    let run = orchestrator(&dir, 0).run_pipeline().await.unwrap();

    assert!(run.succeeded());
    assert_eq!(trace(&dir), vec!["acquire", "enrich", "load", "transform"]);
}

#[tokio::test]
async fn test_enrich_failure_stops_load_and_transform() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("telegram_dbt_project")).unwrap();

    let err = orchestrator(&dir, 1).run_pipeline().await.unwrap_err();

    assert_eq!(err.stage(), Some("enrich"));
    assert!(err.error.to_string().contains("model weights missing"));
    assert_eq!(trace(&dir), vec!["acquire", "enrich"]);

    let enrich = &err.run.stages[1];
    assert_eq!(enrich.status, StageStatus::Failed);
    assert_eq!(enrich.exit_code, Some(1));
    assert_eq!(enrich.stderr.trim(), "model weights missing");
}

#[tokio::test]
async fn test_missing_dbt_project_blocks_transform() {
    let dir = TempDir::new().unwrap();

    let err = orchestrator(&dir, 0).run_pipeline().await.unwrap_err();

    assert!(matches!(err.error, PipelineError::Precondition { ref stage, .. } if stage == "transform"));
    assert_eq!(trace(&dir), vec!["acquire", "enrich", "load"]);
}
