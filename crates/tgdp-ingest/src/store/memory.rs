//! In-memory raw store
//!
//! Mirrors the Postgres backend's observable behaviour: the schema must be
//! bootstrapped before writes, the message key is a primary key, and writes
//! become visible to other transactions only on commit. Faults can be injected
//! to exercise rollback and connection-loss paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RawStore, StoreError, StoreTransaction};
use crate::models::{MessageKey, RawDetectionBatch, RawMessageRecord};

/// A committed detection row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDetection {
    pub id: i64,
    pub batch: RawDetectionBatch,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    schema_ready: bool,
    messages: BTreeMap<MessageKey, (RawMessageRecord, DateTime<Utc>)>,
    detections: Vec<StoredDetection>,
    commits: u64,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_message_ids: HashSet<i64>,
    failing_detection_files: HashSet<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

/// Process-local raw store
#[derive(Debug, Clone, Default)]
pub struct MemoryRawStore {
    shared: Arc<Shared>,
}

// A poisoned lock only means another holder panicked; the data is still
// consistent because every mutation happens in a single critical section.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.shared.faults).unavailable = unavailable;
    }

    /// Make inserting this message id fail with a write error.
    pub fn fail_message_insert(&self, message_id: i64) {
        lock(&self.shared.faults).failing_message_ids.insert(message_id);
    }

    /// Make inserting this detection file fail with a write error.
    pub fn fail_detection_insert(&self, file_name: &str) {
        lock(&self.shared.faults)
            .failing_detection_files
            .insert(file_name.to_string());
    }

    pub fn clear_faults(&self) {
        *lock(&self.shared.faults) = Faults::default();
    }

    pub fn message_count(&self) -> usize {
        lock(&self.shared.state).messages.len()
    }

    pub fn detection_count(&self) -> usize {
        lock(&self.shared.state).detections.len()
    }

    /// Committed message rows, ordered by key
    pub fn messages(&self) -> Vec<RawMessageRecord> {
        lock(&self.shared.state)
            .messages
            .values()
            .map(|(record, _)| record.clone())
            .collect()
    }

    /// Committed detection rows, in insertion order
    pub fn detections(&self) -> Vec<StoredDetection> {
        lock(&self.shared.state).detections.clone()
    }

    /// Number of successful commits
    pub fn commits(&self) -> u64 {
        lock(&self.shared.state).commits
    }
}

#[async_trait]
impl RawStore for MemoryRawStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        if lock(&self.shared.faults).unavailable {
            return Err(StoreError::Connection("memory store marked unavailable".into()));
        }
        lock(&self.shared.state).schema_ready = true;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        if lock(&self.shared.faults).unavailable {
            return Err(StoreError::Connection("memory store marked unavailable".into()));
        }
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            messages: Vec::new(),
            detections: Vec::new(),
        }))
    }

    async fn close(&self) {}
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    messages: Vec<RawMessageRecord>,
    detections: Vec<RawDetectionBatch>,
}

impl MemoryTransaction {
    fn require_schema(&self, relation: &str) -> Result<(), StoreError> {
        if lock(&self.shared.state).schema_ready {
            Ok(())
        } else {
            Err(StoreError::Write(format!("relation \"{}\" does not exist", relation)))
        }
    }

    fn has_message(&self, message_id: i64, channel_username: &str) -> bool {
        let key = MessageKey {
            message_id,
            channel_username: channel_username.to_string(),
        };
        lock(&self.shared.state).messages.contains_key(&key)
            || self.messages.iter().any(|m| m.key() == key)
    }

    fn has_detection(&self, file_name: &str) -> bool {
        lock(&self.shared.state)
            .detections
            .iter()
            .any(|d| d.batch.file_name == file_name)
            || self.detections.iter().any(|d| d.file_name == file_name)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn message_exists(
        &mut self,
        message_id: i64,
        channel_username: &str,
    ) -> Result<bool, StoreError> {
        self.require_schema("raw.telegram_messages")?;
        Ok(self.has_message(message_id, channel_username))
    }

    async fn insert_message(&mut self, record: &RawMessageRecord) -> Result<(), StoreError> {
        self.require_schema("raw.telegram_messages")?;

        if lock(&self.shared.faults)
            .failing_message_ids
            .contains(&record.message_id)
        {
            return Err(StoreError::Write(format!(
                "injected failure for message {}",
                record.message_id
            )));
        }

        if self.has_message(record.message_id, &record.channel_username) {
            return Err(StoreError::Write(format!(
                "duplicate key value violates unique constraint: ({}, {})",
                record.message_id, record.channel_username
            )));
        }

        self.messages.push(record.clone());
        Ok(())
    }

    async fn detection_file_exists(&mut self, file_name: &str) -> Result<bool, StoreError> {
        self.require_schema("raw.yolo_detections")?;
        Ok(self.has_detection(file_name))
    }

    async fn insert_detection_batch(
        &mut self,
        batch: &RawDetectionBatch,
    ) -> Result<(), StoreError> {
        self.require_schema("raw.yolo_detections")?;

        if lock(&self.shared.faults)
            .failing_detection_files
            .contains(&batch.file_name)
        {
            return Err(StoreError::Write(format!(
                "injected failure for {}",
                batch.file_name
            )));
        }

        self.detections.push(batch.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            shared,
            messages,
            detections,
        } = *self;

        let now = Utc::now();
        let mut state = lock(&shared.state);

        // Re-check keys under the lock, as the database would on commit.
        if let Some(dup) = messages.iter().find(|m| state.messages.contains_key(&m.key())) {
            return Err(StoreError::Write(format!(
                "duplicate key value violates unique constraint: ({}, {})",
                dup.message_id, dup.channel_username
            )));
        }

        for record in messages {
            state.messages.insert(record.key(), (record, now));
        }
        for batch in detections {
            let id = state.detections.len() as i64 + 1;
            state.detections.push(StoredDetection {
                id,
                batch,
                inserted_at: now,
            });
        }
        state.commits += 1;

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
