//! Error types for TGDP

use thiserror::Error;

/// Result type alias for TGDP operations
pub type Result<T> = std::result::Result<T, TgdpError>;

/// Configuration and environment errors shared across the workspace
#[derive(Error, Debug)]
pub enum TgdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required configuration value: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TgdpError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
