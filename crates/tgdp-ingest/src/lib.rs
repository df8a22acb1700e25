//! TGDP Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental loader for the raw layer of the Telegram data platform. It
//! moves two JSON data lakes into Postgres:
//!
//! - **Messages**: `<root>/<YYYY-MM-DD>/<channel>.json`, one row per message,
//!   deduplicated on `(message_id, channel_username)`
//! - **Detections**: `<root>/yolo_detections_<stamp>.json`, one row per file,
//!   deduplicated on the file name
//!
//! Each file commits or rolls back as a unit, so a run that dies halfway can
//! simply be started again.
//!
//! # Example
//!
//! ```no_run
//! use tgdp_ingest::config::{DataLakeConfig, DatabaseConfig};
//! use tgdp_ingest::loader::{Loader, LoaderOptions};
//! use tgdp_ingest::store::{PgRawStore, RawStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = PgRawStore::connect(&DatabaseConfig::from_env()?).await?;
//!     let loader = Loader::new(&store, LoaderOptions::default());
//!     loader.prepare().await?;
//!     let summary = loader.load_all(&DataLakeConfig::from_env()?).await?;
//!     println!("{} new rows", summary.rows_inserted);
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod loader;
pub mod models;
pub mod schema;
pub mod store;

pub use loader::{FileOutcome, LoadError, LoadSummary, Loader, LoaderOptions, RecordOutcome};
pub use store::{MemoryRawStore, PgRawStore, RawStore, StoreError};
