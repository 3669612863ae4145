//! Raw adapter output: log records and the batch they travel in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CursorPosition, DeviceKey, ObservedDevice};

/// One raw log entry as extracted from an external source.
///
/// Transient: classified, materialized, and then discarded. Never stored
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogRecord {
    /// Source-specific log type (e.g. `"access"`, `"door"`, `"call"`).
    pub log_type: String,
    /// Source-specific status code within the log type.
    pub status_code: i32,
    /// Device the record refers to.
    pub device: DeviceKey,
    /// When the occurrence started.
    pub occurred_at: DateTime<Utc>,
    /// When the occurrence ended, for sources that report it.
    pub ended_at: Option<DateTime<Utc>>,
    /// Position in the source log; `None` for cursorless sources.
    pub position: Option<CursorPosition>,
    /// Upstream identifier shared by partial updates (e.g. a call id).
    pub correlation_token: Option<String>,
    /// Free-form source payload (card holder, reader name, ...).
    pub payload: serde_json::Value,
}

impl RawLogRecord {
    /// Reads a string field from the payload.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Everything one adapter run extracted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    /// Device metadata seen during the run.
    pub devices: Vec<ObservedDevice>,
    /// Log records in source order.
    pub records: Vec<RawLogRecord>,
}

impl SourceBatch {
    /// Highest cursor position carried by the records.
    #[must_use]
    pub fn last_position(&self) -> Option<CursorPosition> {
        self.records.iter().filter_map(|r| r.position).max()
    }
}
