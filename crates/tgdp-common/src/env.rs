//! Typed access to named configuration values
//!
//! Every component receives an explicit configuration struct built once at
//! startup; these helpers are only used while building those structs.

use std::str::FromStr;

use crate::error::{Result, TgdpError};

/// Load a `.env` file from the current directory or its parents, if present.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }
}

/// Read a variable, treating unset and blank the same way.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable or fall back to `default`.
pub fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Read a variable that must be present.
pub fn require(name: &str) -> Result<String> {
    var(name).ok_or_else(|| TgdpError::MissingVar(name.to_string()))
}

/// Parse an optional variable. A present but unparsable value is an error,
/// never silently replaced by a default.
pub fn parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| TgdpError::InvalidVar {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Parse a variable or fall back to `default` when unset.
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(name)?.unwrap_or(default))
}
