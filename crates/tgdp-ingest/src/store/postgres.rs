//! PostgreSQL raw store

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{RawStore, StoreError, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::models::{RawDetectionBatch, RawMessageRecord};
use crate::schema;

/// Raw store backed by a small sqlx pool
#[derive(Debug, Clone)]
pub struct PgRawStore {
    pool: PgPool,
}

impl PgRawStore {
    /// Open the pool eagerly so that an unreachable database surfaces here,
    /// before any file is touched.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = config
            .connect_options()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RawStore for PgRawStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        schema::ensure_schema(&self.pool).await.map_err(StoreError::from)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        // Failing to obtain a session is always connection-level.
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!("Database connection pool closed");
        }
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn message_exists(
        &mut self,
        message_id: i64,
        channel_username: &str,
    ) -> Result<bool, StoreError> {
        let found: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM raw.telegram_messages
            WHERE message_id = $1 AND channel_username = $2
            "#,
        )
        .bind(message_id)
        .bind(channel_username)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(found.is_some())
    }

    async fn insert_message(&mut self, record: &RawMessageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO raw.telegram_messages (
                message_id, channel_username, scraped_date, message_data
            ) VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.message_id)
        .bind(&record.channel_username)
        .bind(record.scraped_date)
        .bind(Json(&record.payload))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn detection_file_exists(&mut self, file_name: &str) -> Result<bool, StoreError> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM raw.yolo_detections WHERE file_name = $1 LIMIT 1")
                .bind(file_name)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(found.is_some())
    }

    async fn insert_detection_batch(
        &mut self,
        batch: &RawDetectionBatch,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO raw.yolo_detections (detection_data, file_name)
            VALUES ($1, $2)
            "#,
        )
        .bind(Json(&batch.payload))
        .bind(&batch.file_name)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.commit().await.map_err(StoreError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.rollback().await.map_err(StoreError::from)
    }
}
