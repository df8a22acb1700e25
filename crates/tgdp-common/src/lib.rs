//! TGDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the TGDP workspace members:
//!
//! - **Error Handling**: [`TgdpError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber bootstrap driven by [`logging::LogConfig`]
//! - **Environment**: typed readers for named configuration values
//!
//! # Example
//!
//! ```no_run
//! use tgdp_common::env;
//! use tgdp_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     env::load_dotenv();
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let port: u16 = env::parse_or("POSTGRES_PORT", 5432)?;
//!     tracing::info!(port, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TgdpError};
