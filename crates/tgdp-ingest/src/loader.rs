//! Incremental raw-data loader
//!
//! Drives discovery, the per-unit dedup check and the transactional writes.
//! Each file is loaded in its own transaction and moves through
//! `Discovered -> Parsing -> {Committed | Skipped | Failed}`. A file's outcome
//! never depends on another file's, so a run can be interrupted and repeated
//! at any point and converges to the same rows.
//!
//! Only two conditions end a run early: the schema cannot be bootstrapped, or
//! no session can be opened. Everything else is recorded against the file or
//! record it concerns and the run moves on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DataLakeConfig;
use crate::discovery::{discover, DiscoveredFile, DiscoveryError, Partition, SourceLayout};
use crate::models::{MessageKey, RawDetectionBatch, RawMessageRecord};
use crate::store::{RawStore, StoreError, StoreTransaction};

/// Loader failures. Only [`LoadError::Connection`] and [`LoadError::Schema`]
/// abort a run; the rest are scoped to one file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot open database session: {0}")]
    Connection(String),

    #[error("cannot bootstrap raw schema: {0}")]
    Schema(String),

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} does not contain a JSON array", .path.display())]
    NotArray { path: PathBuf },

    #[error("write failed for {}, transaction rolled back: {message}", .path.display())]
    Write { path: PathBuf, message: String },
}

impl LoadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoadError::Connection(_) | LoadError::Schema(_))
    }
}

/// Which lake a run reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Messages,
    Detections,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Messages => write!(f, "messages"),
            SourceKind::Detections => write!(f, "detections"),
        }
    }
}

/// Result for a single record inside a message file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    SkippedDuplicate,
    SkippedInvalid(String),
}

/// Per-file counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileCounts {
    pub inserted: u64,
    pub duplicates: u64,
    pub invalid: u64,
}

/// Terminal state of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Transaction committed (rolled back instead under dry run)
    Committed(FileCounts),
    /// Detection file already stored; nothing written
    SkippedDuplicateFile,
    /// Zero-length array; nothing written
    Empty,
}

/// Counters for one loader run
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub files_discovered: u64,
    pub files_committed: u64,
    pub files_duplicate: u64,
    pub files_empty: u64,
    pub files_failed: u64,
    pub malformed_paths: u64,
    pub unreadable_paths: u64,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub records_invalid: u64,
    pub failed_files: Vec<PathBuf>,
    pub dry_run: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LoadSummary {
    fn start(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Committed(counts) => {
                self.files_committed += 1;
                self.rows_inserted += counts.inserted;
                self.rows_duplicate += counts.duplicates;
                self.records_invalid += counts.invalid;
            },
            FileOutcome::SkippedDuplicateFile => self.files_duplicate += 1,
            FileOutcome::Empty => self.files_empty += 1,
        }
    }

    fn record_skipped_path(&mut self, error: &DiscoveryError) {
        match error {
            DiscoveryError::Malformed { .. } => self.malformed_paths += 1,
            DiscoveryError::Walk { .. } => self.unreadable_paths += 1,
        }
    }

    fn record_failure(&mut self, path: &Path) {
        self.files_failed += 1;
        self.failed_files.push(path.to_path_buf());
    }

    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: LoadSummary) {
        self.files_discovered += other.files_discovered;
        self.files_committed += other.files_committed;
        self.files_duplicate += other.files_duplicate;
        self.files_empty += other.files_empty;
        self.files_failed += other.files_failed;
        self.malformed_paths += other.malformed_paths;
        self.unreadable_paths += other.unreadable_paths;
        self.rows_inserted += other.rows_inserted;
        self.rows_duplicate += other.rows_duplicate;
        self.records_invalid += other.records_invalid;
        self.failed_files.extend(other.failed_files);
        self.dry_run |= other.dry_run;
        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.completed_at = match (self.completed_at, other.completed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn has_failures(&self) -> bool {
        self.files_failed > 0
    }

    pub fn duration_secs(&self) -> f64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

/// Loader tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Emit a progress line each time this many new rows have been committed
    pub progress_every: u64,
    /// Roll back every file's transaction instead of committing
    pub dry_run: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            progress_every: crate::config::DEFAULT_PROGRESS_EVERY,
            dry_run: false,
        }
    }
}

/// Units a dry run would have committed. Rolled-back transactions leave no
/// trace in the store, so later files consult this instead.
#[derive(Debug, Default)]
struct DryRunLedger {
    messages: HashSet<MessageKey>,
    detection_files: HashSet<String>,
}

/// Keys written inside the current file's transaction
#[derive(Debug, Default)]
struct StagedKeys {
    messages: Vec<MessageKey>,
    detection_file: Option<String>,
}

/// Running count of new rows for progress lines
#[derive(Debug, Clone, Copy)]
struct Progress {
    source: SourceKind,
    every: u64,
    inserted: u64,
}

impl Progress {
    fn new(source: SourceKind, every: u64) -> Self {
        Self {
            source,
            every: every.max(1),
            inserted: 0,
        }
    }

    fn row_inserted(&mut self) {
        self.inserted += 1;
        if self.inserted % self.every == 0 {
            info!(
                source = %self.source,
                rows_inserted = self.inserted,
                "Inserted {} new rows so far...",
                self.inserted
            );
        }
    }

    // Rows of a rolled-back file were never inserted.
    fn reset_to(&mut self, committed: u64) {
        self.inserted = committed;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sequential, single-writer loader over a [`RawStore`]
pub struct Loader<'s> {
    store: &'s dyn RawStore,
    options: LoaderOptions,
    ledger: Mutex<DryRunLedger>,
}

impl<'s> Loader<'s> {
    pub fn new(store: &'s dyn RawStore, options: LoaderOptions) -> Self {
        Self {
            store,
            options,
            ledger: Mutex::new(DryRunLedger::default()),
        }
    }

    /// Bootstrap the raw schema. Must precede any load in the session.
    pub async fn prepare(&self) -> Result<(), LoadError> {
        self.store.ensure_schema().await.map_err(|e| match e {
            StoreError::Connection(msg) => LoadError::Connection(msg),
            StoreError::Write(msg) => LoadError::Schema(msg),
        })
    }

    /// Load messages, then detections, as configured.
    pub async fn load_all(&self, lake: &DataLakeConfig) -> Result<LoadSummary, LoadError> {
        let mut summary = self.load_messages(&lake.messages_root).await?;
        summary.merge(
            self.load_detections(&lake.detections_root, &lake.detection_prefix)
                .await?,
        );
        Ok(summary)
    }

    pub async fn load_messages(&self, root: &Path) -> Result<LoadSummary, LoadError> {
        self.load_source(SourceKind::Messages, root, &SourceLayout::DatePartitioned)
            .await
    }

    pub async fn load_detections(
        &self,
        root: &Path,
        prefix: &str,
    ) -> Result<LoadSummary, LoadError> {
        let layout = SourceLayout::FlatPrefixed {
            prefix: prefix.to_string(),
        };
        self.load_source(SourceKind::Detections, root, &layout).await
    }

    #[instrument(skip(self, root, layout), fields(root = %root.display()))]
    async fn load_source(
        &self,
        source: SourceKind,
        root: &Path,
        layout: &SourceLayout,
    ) -> Result<LoadSummary, LoadError> {
        let mut summary = LoadSummary::start(self.options.dry_run);

        if !root.is_dir() {
            warn!(%source, "Data lake root does not exist; nothing to load");
            summary.complete();
            return Ok(summary);
        }

        info!(%source, dry_run = self.options.dry_run, "Starting raw data load");
        let mut progress = Progress::new(source, self.options.progress_every);

        for candidate in discover(root, layout) {
            let file = match candidate {
                Ok(file) => file,
                Err(e) => {
                    match e {
                        DiscoveryError::Malformed { .. } => {
                            warn!(%source, error = %e, "Skipping malformed path")
                        },
                        DiscoveryError::Walk { .. } => {
                            warn!(%source, error = %e, "Skipping unreadable directory entry")
                        },
                    }
                    summary.record_skipped_path(&e);
                    continue;
                },
            };
            summary.files_discovered += 1;

            match self.load_file_with_progress(&file, &mut progress).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) if e.is_fatal() => {
                    error!(%source, file = %file.path.display(), error = %e, "Aborting load");
                    return Err(e);
                },
                Err(e) => {
                    error!(file = %file.path.display(), error = %e, "File failed; continuing with next file");
                    summary.record_failure(&file.path);
                },
            }
            progress.reset_to(summary.rows_inserted);
        }

        summary.complete();
        info!(
            %source,
            files_discovered = summary.files_discovered,
            files_committed = summary.files_committed,
            files_duplicate = summary.files_duplicate,
            files_empty = summary.files_empty,
            files_failed = summary.files_failed,
            malformed_paths = summary.malformed_paths,
            unreadable_paths = summary.unreadable_paths,
            rows_inserted = summary.rows_inserted,
            rows_duplicate = summary.rows_duplicate,
            records_invalid = summary.records_invalid,
            duration_secs = summary.duration_secs(),
            "Finished loading raw data. Total new rows inserted: {}",
            summary.rows_inserted
        );

        Ok(summary)
    }

    /// Load one file atomically.
    ///
    /// Parse failures happen before any transaction is opened. Write failures
    /// roll back this file's transaction only.
    pub async fn load_file(&self, file: &DiscoveredFile) -> Result<FileOutcome, LoadError> {
        let source = match file.partition {
            Partition::Messages { .. } => SourceKind::Messages,
            Partition::Detections { .. } => SourceKind::Detections,
        };
        let mut progress = Progress::new(source, self.options.progress_every);
        self.load_file_with_progress(file, &mut progress).await
    }

    #[instrument(skip(self, file, progress), fields(file = %file.path.display()))]
    async fn load_file_with_progress(
        &self,
        file: &DiscoveredFile,
        progress: &mut Progress,
    ) -> Result<FileOutcome, LoadError> {
        let items = read_json_array(&file.path)?;

        if items.is_empty() {
            warn!("File contains an empty array; skipping");
            return Ok(FileOutcome::Empty);
        }

        let mut tx = self.store.begin().await.map_err(|e| match e {
            StoreError::Connection(msg) => LoadError::Connection(msg),
            StoreError::Write(msg) => LoadError::Write {
                path: file.path.clone(),
                message: msg,
            },
        })?;

        let mut staged = StagedKeys::default();
        let written = match &file.partition {
            Partition::Messages {
                scraped_date,
                channel,
            } => {
                self.write_messages(tx.as_mut(), *scraped_date, channel, items, &mut staged, progress)
                    .await
            },
            Partition::Detections { file_name } => {
                let staged_earlier =
                    self.options.dry_run && lock(&self.ledger).detection_files.contains(file_name);
                if staged_earlier {
                    Ok(FileOutcome::SkippedDuplicateFile)
                } else {
                    let written = write_detections(tx.as_mut(), file_name, items).await;
                    if let Ok(FileOutcome::Committed(_)) = written {
                        staged.detection_file = Some(file_name.clone());
                        progress.row_inserted();
                    }
                    written
                }
            },
        };

        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed; session will discard the transaction");
                }
                return Err(LoadError::Write {
                    path: file.path.clone(),
                    message: e.to_string(),
                });
            },
        };

        let finish = if self.options.dry_run || outcome == FileOutcome::SkippedDuplicateFile {
            tx.rollback().await
        } else {
            tx.commit().await
        };
        finish.map_err(|e| LoadError::Write {
            path: file.path.clone(),
            message: e.to_string(),
        })?;

        if self.options.dry_run {
            let mut ledger = lock(&self.ledger);
            ledger.messages.extend(staged.messages);
            ledger.detection_files.extend(staged.detection_file);
        }

        match &outcome {
            FileOutcome::Committed(counts) => info!(
                inserted = counts.inserted,
                duplicates = counts.duplicates,
                invalid = counts.invalid,
                dry_run = self.options.dry_run,
                "Successfully processed file"
            ),
            FileOutcome::SkippedDuplicateFile => debug!("File already loaded; skipping"),
            FileOutcome::Empty => {},
        }

        Ok(outcome)
    }

    async fn write_messages(
        &self,
        tx: &mut dyn StoreTransaction,
        scraped_date: NaiveDate,
        path_channel: &str,
        items: Vec<Value>,
        staged: &mut StagedKeys,
        progress: &mut Progress,
    ) -> Result<FileOutcome, StoreError> {
        let mut counts = FileCounts::default();

        for (index, payload) in items.into_iter().enumerate() {
            if let Some(record_channel) = payload.get("channel_username").and_then(Value::as_str) {
                if record_channel != path_channel {
                    debug!(
                        index,
                        %record_channel,
                        %path_channel,
                        "Record channel differs from file name; keeping record channel"
                    );
                }
            }

            let key = MessageKey::from_payload(&payload).ok();
            let staged_earlier = self.options.dry_run
                && key
                    .as_ref()
                    .is_some_and(|key| lock(&self.ledger).messages.contains(key));
            let outcome = if staged_earlier {
                RecordOutcome::SkippedDuplicate
            } else {
                write_message(tx, scraped_date, payload).await?
            };

            match outcome {
                RecordOutcome::Inserted => {
                    counts.inserted += 1;
                    staged.messages.extend(key);
                    progress.row_inserted();
                },
                RecordOutcome::SkippedDuplicate => counts.duplicates += 1,
                RecordOutcome::SkippedInvalid(reason) => {
                    warn!(index, %reason, "Skipping invalid record");
                    counts.invalid += 1;
                },
            }
        }

        debug!(channel = %path_channel, %scraped_date, ?counts, "Message file written");
        Ok(FileOutcome::Committed(counts))
    }
}

/// Insert one scraped message unless it is invalid or already stored.
pub async fn write_message(
    tx: &mut dyn StoreTransaction,
    scraped_date: NaiveDate,
    payload: Value,
) -> Result<RecordOutcome, StoreError> {
    let key = match MessageKey::from_payload(&payload) {
        Ok(key) => key,
        Err(reason) => return Ok(RecordOutcome::SkippedInvalid(reason.to_string())),
    };

    if tx
        .message_exists(key.message_id, &key.channel_username)
        .await?
    {
        return Ok(RecordOutcome::SkippedDuplicate);
    }

    tx.insert_message(&RawMessageRecord::new(key, scraped_date, payload))
        .await?;
    Ok(RecordOutcome::Inserted)
}

/// Store a whole detection file as one row unless its name is already recorded.
async fn write_detections(
    tx: &mut dyn StoreTransaction,
    file_name: &str,
    items: Vec<Value>,
) -> Result<FileOutcome, StoreError> {
    if tx.detection_file_exists(file_name).await? {
        return Ok(FileOutcome::SkippedDuplicateFile);
    }

    tx.insert_detection_batch(&RawDetectionBatch {
        file_name: file_name.to_string(),
        payload: Value::Array(items),
    })
    .await?;

    Ok(FileOutcome::Committed(FileCounts {
        inserted: 1,
        ..Default::default()
    }))
}

/// Read a file that must hold a top-level JSON array.
pub fn read_json_array(path: &Path) -> Result<Vec<Value>, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(LoadError::NotArray {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(LoadError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryRawStore;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects `rows_inserted` from "so far" progress lines
    #[derive(Clone, Default)]
    struct ProgressLines(Arc<Mutex<Vec<u64>>>);

    #[derive(Default)]
    struct ProgressVisitor {
        message: String,
        rows: Option<u64>,
    }

    impl Visit for ProgressVisitor {
        fn record_u64(&mut self, field: &Field, value: u64) {
            if field.name() == "rows_inserted" {
                self.rows = Some(value);
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for ProgressLines {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = ProgressVisitor::default();
            event.record(&mut visitor);
            if let (true, Some(rows)) = (visitor.message.contains("so far"), visitor.rows) {
                self.0.lock().unwrap().push(rows);
            }
        }
    }

    fn write_json(root: &Path, relative: &str, value: &Value) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
        path
    }

    fn messages(channel: &str, ids: &[i64]) -> Value {
        Value::Array(
            ids.iter()
                .map(|id| json!({"message_id": id, "channel_username": channel, "text": "in stock"}))
                .collect(),
        )
    }

    async fn prepared(store: &MemoryRawStore) -> Loader<'_> {
        let loader = Loader::new(store, LoaderOptions::default());
        loader.prepare().await.unwrap();
        loader
    }

    #[tokio::test]
    async fn test_rerun_inserts_nothing() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@CheMed123.json", &messages("@CheMed123", &[1, 2, 3]));
        write_json(lake.path(), "2025-01-01/@tikvahpharma.json", &messages("@tikvahpharma", &[1, 2]));

        let store = MemoryRawStore::new();
        let loader = prepared(&store).await;

        let first = loader.load_messages(lake.path()).await.unwrap();
        assert_eq!(first.rows_inserted, 5);
        assert_eq!(first.files_committed, 2);

        let second = loader.load_messages(lake.path()).await.unwrap();
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.rows_duplicate, 5);
        assert_eq!(store.message_count(), 5);
    }

    #[tokio::test]
    async fn test_scraped_date_comes_from_partition() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2024-12-31/@CheMed123.json", &messages("@CheMed123", &[9]));

        let store = MemoryRawStore::new();
        prepared(&store).await.load_messages(lake.path()).await.unwrap();

        let rows = store.messages();
        assert_eq!(rows[0].scraped_date, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(rows[0].payload["text"], "in stock");
    }

    #[tokio::test]
    async fn test_invalid_record_skipped_file_still_commits() {
        let lake = TempDir::new().unwrap();
        write_json(
            lake.path(),
            "2025-01-01/@CheMed123.json",
            &json!([
                {"message_id": 10, "channel_username": "@CheMed123"},
                {"channel_username": "@CheMed123", "text": "no id"}
            ]),
        );

        let store = MemoryRawStore::new();
        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();

        assert_eq!(summary.rows_inserted, 1);
        assert_eq!(summary.records_invalid, 1);
        assert_eq!(summary.files_committed, 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_bad_json_file_is_isolated() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2]));
        let broken = lake.path().join("2025-01-01/@b.json");
        fs::write(&broken, "[{\"message_id\": 1,").unwrap();
        write_json(lake.path(), "2025-01-01/@c.json", &messages("@c", &[1]));

        let store = MemoryRawStore::new();
        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();

        assert_eq!(summary.files_committed, 2);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.failed_files, vec![broken]);
        assert_eq!(store.message_count(), 3);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_whole_file() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2, 3]));
        write_json(lake.path(), "2025-01-01/@b.json", &messages("@b", &[40, 41]));

        let store = MemoryRawStore::new();
        store.fail_message_insert(3);

        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();

        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_committed, 1);
        let ids: Vec<i64> = store.messages().iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![40, 41]);
    }

    #[tokio::test]
    async fn test_non_array_file_fails() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &json!({"message_id": 1}));

        let store = MemoryRawStore::new();
        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();
        assert_eq!(summary.files_failed, 1);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_is_not_an_error() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &json!([]));

        let store = MemoryRawStore::new();
        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();
        assert_eq!(summary.files_empty, 1);
        assert_eq!(summary.files_failed, 0);
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_detection_file_deduplicated_by_name() {
        let lake = TempDir::new().unwrap();
        let detections = json!([
            {"message_id": 1, "detected_object_class": "bottle", "confidence_score": 0.91},
            {"message_id": 1, "detected_object_class": "person", "confidence_score": 0.55}
        ]);
        write_json(lake.path(), "yolo_detections_2025-01-01_000000.json", &detections);

        let store = MemoryRawStore::new();
        let loader = prepared(&store).await;

        let first = loader
            .load_detections(lake.path(), "yolo_detections_")
            .await
            .unwrap();
        assert_eq!(first.rows_inserted, 1);
        assert_eq!(first.files_committed, 1);

        let second = loader
            .load_detections(lake.path(), "yolo_detections_")
            .await
            .unwrap();
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.files_duplicate, 1);

        let rows = store.detections();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch.payload, detections);
        assert_eq!(rows[0].batch.file_name, "yolo_detections_2025-01-01_000000.json");
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_run() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1]));
        write_json(lake.path(), "2025-01-01/@b.json", &messages("@b", &[1]));

        let store = MemoryRawStore::new();
        let loader = prepared(&store).await;
        store.set_unavailable(true);

        let err = loader.load_messages(lake.path()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_run_converges() {
        let lake = TempDir::new().unwrap();
        let first = write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2]));
        write_json(lake.path(), "2025-01-02/@a.json", &messages("@a", &[2, 3]));

        let interrupted = MemoryRawStore::new();
        let loader = prepared(&interrupted).await;
        let file_a = discover(lake.path(), &SourceLayout::DatePartitioned)
            .map(Result::unwrap)
            .find(|f| f.path == first)
            .unwrap();
        loader.load_file(&file_a).await.unwrap();
        loader.load_messages(lake.path()).await.unwrap();

        let uninterrupted = MemoryRawStore::new();
        prepared(&uninterrupted)
            .await
            .load_messages(lake.path())
            .await
            .unwrap();

        assert_eq!(interrupted.messages(), uninterrupted.messages());
        assert_eq!(interrupted.message_count(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2]));

        let store = MemoryRawStore::new();
        let loader = Loader::new(
            &store,
            LoaderOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        loader.prepare().await.unwrap();

        let summary = loader.load_messages(lake.path()).await.unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty_run() {
        let store = MemoryRawStore::new();
        let summary = prepared(&store)
            .await
            .load_messages(Path::new("/definitely/not/here"))
            .await
            .unwrap();
        assert_eq!(summary.files_discovered, 0);
    }

    #[test]
    fn test_summary_merge() {
        let mut a = LoadSummary {
            rows_inserted: 5,
            files_failed: 1,
            failed_files: vec![PathBuf::from("a.json")],
            ..Default::default()
        };
        let b = LoadSummary {
            rows_inserted: 1,
            files_duplicate: 2,
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.rows_inserted, 6);
        assert_eq!(a.files_duplicate, 2);
        assert!(a.has_failures());
    }

    #[tokio::test]
    async fn test_dry_run_reports_what_a_real_run_inserts() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2]));
        write_json(lake.path(), "2025-01-02/@a.json", &messages("@a", &[2, 3]));

        let dry_store = MemoryRawStore::new();
        let dry_loader = Loader::new(
            &dry_store,
            LoaderOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        dry_loader.prepare().await.unwrap();
        let dry = dry_loader.load_messages(lake.path()).await.unwrap();

        let real_store = MemoryRawStore::new();
        let real = prepared(&real_store).await.load_messages(lake.path()).await.unwrap();

        assert_eq!(dry.rows_inserted, real.rows_inserted);
        assert_eq!(dry.rows_duplicate, real.rows_duplicate);
        assert_eq!(dry.rows_inserted, 3);
        assert_eq!(dry.rows_duplicate, 1);
        assert_eq!(dry_store.message_count(), 0);
        assert_eq!(real_store.message_count(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_repeat_sees_detection_file_as_loaded() {
        let lake = TempDir::new().unwrap();
        write_json(
            lake.path(),
            "yolo_detections_2025-01-01_000000.json",
            &json!([{"message_id": 7, "detected_object_class": "bottle"}]),
        );

        let store = MemoryRawStore::new();
        let loader = Loader::new(
            &store,
            LoaderOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        loader.prepare().await.unwrap();

        let first = loader
            .load_detections(lake.path(), "yolo_detections_")
            .await
            .unwrap();
        let second = loader
            .load_detections(lake.path(), "yolo_detections_")
            .await
            .unwrap();

        assert_eq!(first.files_committed, 1);
        assert_eq!(second.files_committed, 0);
        assert_eq!(second.files_duplicate, 1);
        assert_eq!(store.detection_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_reported_inside_a_large_file() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "2025-01-01/@a.json", &messages("@a", &[1, 2, 3, 4, 5, 6, 7]));
        write_json(lake.path(), "2025-01-02/@a.json", &messages("@a", &[8, 9]));

        let lines = ProgressLines::default();
        let subscriber = tracing_subscriber::registry().with(lines.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = MemoryRawStore::new();
        let loader = Loader::new(
            &store,
            LoaderOptions {
                progress_every: 3,
                dry_run: false,
            },
        );
        loader.prepare().await.unwrap();
        let summary = loader.load_messages(lake.path()).await.unwrap();

        assert_eq!(summary.rows_inserted, 9);
        assert_eq!(*lines.0.lock().unwrap(), vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn test_malformed_partition_does_not_block_siblings() {
        let lake = TempDir::new().unwrap();
        write_json(lake.path(), "latest/@a.json", &messages("@a", &[1]));
        write_json(lake.path(), "2025-01-01/@b.json", &messages("@b", &[1, 2]));

        let store = MemoryRawStore::new();
        let summary = prepared(&store).await.load_messages(lake.path()).await.unwrap();

        assert_eq!(summary.malformed_paths, 1);
        assert_eq!(summary.files_discovered, 1);
        assert_eq!(summary.files_committed, 1);
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_unreadable_entries_counted_apart_from_malformed() {
        let missing = Path::new("/definitely/not/here");
        let source = walkdir::WalkDir::new(missing)
            .into_iter()
            .next()
            .unwrap()
            .unwrap_err();

        let mut summary = LoadSummary::default();
        summary.record_skipped_path(&DiscoveryError::Walk {
            path: missing.to_path_buf(),
            source,
        });
        summary.record_skipped_path(&DiscoveryError::Malformed {
            path: PathBuf::from("latest/@a.json"),
            reason: "not a date".to_string(),
        });

        assert_eq!(summary.unreadable_paths, 1);
        assert_eq!(summary.malformed_paths, 1);
    }
}
