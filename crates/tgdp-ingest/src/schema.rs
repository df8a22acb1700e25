//! Raw schema bootstrap
//!
//! Every statement is conditional on non-existence, so the bootstrap runs at
//! the start of each loader invocation. The statements execute in a single
//! transaction holding an advisory lock; concurrent bootstrappers queue on the
//! lock instead of racing on catalog entries.

use sqlx::PgPool;
use tracing::info;

/// Advisory lock key for the bootstrap transaction ("tgdp").
pub const SCHEMA_LOCK_KEY: i64 = 0x7467_6470;

pub const CREATE_RAW_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS raw";

pub const CREATE_MESSAGES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS raw.telegram_messages (
        message_id BIGINT NOT NULL,
        channel_username VARCHAR(255) NOT NULL,
        scraped_date DATE NOT NULL,
        message_data JSONB NOT NULL,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (message_id, channel_username)
    )
"#;

pub const CREATE_MESSAGES_CHANNEL_DATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_raw_channel_date
    ON raw.telegram_messages (channel_username, scraped_date)
"#;

pub const CREATE_DETECTIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS raw.yolo_detections (
        id BIGSERIAL PRIMARY KEY,
        detection_data JSONB NOT NULL,
        file_name VARCHAR(255) NOT NULL,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const CREATE_DETECTIONS_INSERTED_AT_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_yolo_inserted_at
    ON raw.yolo_detections (inserted_at)
"#;

// Lookup index for the per-file dedup check. Not unique: file-name
// uniqueness is enforced by the loader's existence check.
pub const CREATE_DETECTIONS_FILE_NAME_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_yolo_file_name
    ON raw.yolo_detections (file_name)
"#;

/// DDL in execution order
pub const BOOTSTRAP_STATEMENTS: &[&str] = &[
    CREATE_RAW_SCHEMA,
    CREATE_MESSAGES_TABLE,
    CREATE_MESSAGES_CHANNEL_DATE_INDEX,
    CREATE_DETECTIONS_TABLE,
    CREATE_DETECTIONS_INSERTED_AT_INDEX,
    CREATE_DETECTIONS_FILE_NAME_INDEX,
];

/// Create the `raw` schema, both tables and their indexes if absent.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for statement in BOOTSTRAP_STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(
        statements = BOOTSTRAP_STATEMENTS.len(),
        "Checked/created raw.telegram_messages and raw.yolo_detections"
    );

    Ok(())
}
