//! Raw-store row types and payload validation
//!
//! Payloads are kept verbatim as JSON. Only the natural key of a message is
//! typed; every other field passes through untouched so that new scraper
//! fields reach the raw tables without code changes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Natural key of a scraped message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub message_id: i64,
    pub channel_username: String,
}

/// Why a record inside a message file was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl MessageKey {
    /// Extract and validate `message_id` (integer) and `channel_username`
    /// (non-empty string) from a scraped message object.
    pub fn from_payload(payload: &Value) -> Result<Self, InvalidRecord> {
        let object = payload.as_object().ok_or(InvalidRecord::NotAnObject)?;

        let message_id = match object.get("message_id") {
            None | Some(Value::Null) => return Err(InvalidRecord::MissingField("message_id")),
            Some(value) => integral(value).ok_or(InvalidRecord::WrongType {
                field: "message_id",
                expected: "an integer",
            })?,
        };

        let channel_username = match object.get("channel_username") {
            None | Some(Value::Null) => {
                return Err(InvalidRecord::MissingField("channel_username"))
            },
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(_) => {
                return Err(InvalidRecord::WrongType {
                    field: "channel_username",
                    expected: "a non-empty string",
                })
            },
        };

        Ok(Self {
            message_id,
            channel_username,
        })
    }
}

// Exporters sometimes write ids as floats (`4417.0`); accept those when
// nothing is lost converting them.
fn integral(value: &Value) -> Option<i64> {
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    let float = value.as_f64()?;
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    (float.fract() == 0.0 && in_range).then_some(float as i64)
}

/// One row of `raw.telegram_messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessageRecord {
    pub message_id: i64,
    pub channel_username: String,
    /// Taken from the partition directory, not from the payload
    pub scraped_date: NaiveDate,
    pub payload: Value,
}

impl RawMessageRecord {
    pub fn new(key: MessageKey, scraped_date: NaiveDate, payload: Value) -> Self {
        Self {
            message_id: key.message_id,
            channel_username: key.channel_username,
            scraped_date,
            payload,
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            message_id: self.message_id,
            channel_username: self.channel_username.clone(),
        }
    }
}

/// One row of `raw.yolo_detections`: a whole detection file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetectionBatch {
    pub file_name: String,
    /// The complete parsed array
    pub payload: Value,
}
