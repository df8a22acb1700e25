//! Loader configuration
//!
//! Values are read once from the environment (optionally seeded from `.env`)
//! and passed explicitly into the store and the loader.

use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use tgdp_common::{env, Result, TgdpError};

// ============================================================================
// Defaults
// ============================================================================

/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default PostgreSQL host.
pub const DEFAULT_POSTGRES_HOST: &str = "localhost";

/// The loader is a single writer; one pooled connection is enough.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default root of the date-partitioned message lake.
pub const DEFAULT_MESSAGES_ROOT: &str = "data/raw/telegram_messages";

/// Default root of the flat detection lake.
pub const DEFAULT_DETECTIONS_ROOT: &str = "data/raw/yolo_detections";

/// File name prefix that marks a detection file.
pub const DEFAULT_DETECTION_PREFIX: &str = "yolo_detections_";

/// New rows between two progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// Database connection settings
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; when set it wins over the individual fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    /// Load from `DATABASE_URL`, or from `POSTGRES_HOST`, `POSTGRES_PORT`,
    /// `POSTGRES_DB`, `POSTGRES_USER` and `POSTGRES_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL");

        let (name, user) = if url.is_some() {
            (env::var_or("POSTGRES_DB", ""), env::var_or("POSTGRES_USER", ""))
        } else {
            (env::require("POSTGRES_DB")?, env::require("POSTGRES_USER")?)
        };

        let config = Self {
            url,
            host: env::var_or("POSTGRES_HOST", DEFAULT_POSTGRES_HOST),
            port: env::parse_or("POSTGRES_PORT", DEFAULT_POSTGRES_PORT)?,
            name,
            user,
            password: env::var("POSTGRES_PASSWORD"),
            max_connections: env::parse_or("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            connect_timeout_secs: env::parse_or("DB_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(TgdpError::config("DB_MAX_CONNECTIONS must be greater than 0"));
        }
        if self.url.is_some() {
            return Ok(());
        }
        if self.port == 0 {
            return Err(TgdpError::config("POSTGRES_PORT must be greater than 0"));
        }
        if self.host.is_empty() || self.name.is_empty() || self.user.is_empty() {
            return Err(TgdpError::config(
                "POSTGRES_HOST, POSTGRES_DB and POSTGRES_USER must not be empty",
            ));
        }
        Ok(())
    }

    /// Build sqlx connect options from either the URL or the discrete fields.
    pub fn connect_options(&self) -> std::result::Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return url.parse();
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user);

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        Ok(options)
    }
}

/// Locations of the raw JSON data lakes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLakeConfig {
    /// `<root>/<YYYY-MM-DD>/<channel>.json`
    pub messages_root: PathBuf,
    /// `<root>/<prefix>*.json`
    pub detections_root: PathBuf,
    pub detection_prefix: String,
    pub progress_every: u64,
}

impl Default for DataLakeConfig {
    fn default() -> Self {
        Self {
            messages_root: PathBuf::from(DEFAULT_MESSAGES_ROOT),
            detections_root: PathBuf::from(DEFAULT_DETECTIONS_ROOT),
            detection_prefix: DEFAULT_DETECTION_PREFIX.to_string(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl DataLakeConfig {
    /// Load from `TGDP_MESSAGES_ROOT`, `TGDP_DETECTIONS_ROOT`,
    /// `TGDP_DETECTION_PREFIX` and `TGDP_PROGRESS_EVERY`.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            messages_root: PathBuf::from(env::var_or("TGDP_MESSAGES_ROOT", DEFAULT_MESSAGES_ROOT)),
            detections_root: PathBuf::from(env::var_or(
                "TGDP_DETECTIONS_ROOT",
                DEFAULT_DETECTIONS_ROOT,
            )),
            detection_prefix: env::var_or("TGDP_DETECTION_PREFIX", DEFAULT_DETECTION_PREFIX),
            progress_every: env::parse_or("TGDP_PROGRESS_EVERY", DEFAULT_PROGRESS_EVERY)?,
        };

        if config.progress_every == 0 {
            return Err(TgdpError::config("TGDP_PROGRESS_EVERY must be greater than 0"));
        }

        Ok(config)
    }
}
