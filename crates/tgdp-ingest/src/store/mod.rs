//! Raw store abstraction
//!
//! The loader talks to the raw tables only through [`RawStore`] and the
//! per-file [`StoreTransaction`] it hands out. Postgres is the production
//! backend; the in-memory backend serves offline validation runs and tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{RawDetectionBatch, RawMessageRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRawStore;
pub use postgres::PgRawStore;

/// Classified store failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No usable session: pool exhausted or closed, network or TLS failure
    #[error("database connection unavailable: {0}")]
    Connection(String),

    /// The session works but a statement or commit failed
    #[error("database write failed: {0}")]
    Write(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Connection(err.to_string()),
            other => StoreError::Write(other.to_string()),
        }
    }
}

/// A backend that can bootstrap the raw schema and open file-scoped transactions
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Create schema, tables and indexes if absent. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Open a transaction scoped to one input file.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Release all sessions. Safe to call more than once.
    async fn close(&self);
}

/// Writes for exactly one file. Dropping without commit discards the writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Whether `(message_id, channel_username)` is already persisted
    /// (including rows written earlier in this transaction).
    async fn message_exists(
        &mut self,
        message_id: i64,
        channel_username: &str,
    ) -> Result<bool, StoreError>;

    async fn insert_message(&mut self, record: &RawMessageRecord) -> Result<(), StoreError>;

    /// Whether a detection file with this name has already been stored
    async fn detection_file_exists(&mut self, file_name: &str) -> Result<bool, StoreError>;

    async fn insert_detection_batch(&mut self, batch: &RawDetectionBatch)
        -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
