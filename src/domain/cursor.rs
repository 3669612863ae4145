//! Per-source poll cursor.
//!
//! A [`PollCursor`] remembers the last fully committed position of a
//! source's log stream. It only ever moves forward, and it is written in
//! the same transaction as the batch it covers: a failed run leaves it
//! untouched so the next run reprocesses the same window.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Position in a source log, ordered by `(date, time, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Log date.
    pub date: NaiveDate,
    /// Log time of day.
    pub time: NaiveTime,
    /// Source row index, breaking ties within one second.
    pub index: i64,
}

impl CursorPosition {
    /// Creates a position from its parts.
    #[must_use]
    pub const fn new(date: NaiveDate, time: NaiveTime, index: i64) -> Self {
        Self { date, time, index }
    }
}

/// Last committed position of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    /// Source name.
    pub source: String,
    /// Last committed position; `None` before the first commit.
    pub position: Option<CursorPosition>,
    /// When the cursor last moved.
    pub updated_at: Option<DateTime<Utc>>,
}

impl PollCursor {
    /// Cursor of a source that has never committed.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            position: None,
            updated_at: None,
        }
    }

    /// Returns the position to commit after a batch ending at `candidate`,
    /// or `None` if the cursor would not move forward.
    #[must_use]
    pub fn next_position(&self, candidate: Option<CursorPosition>) -> Option<CursorPosition> {
        let candidate = candidate?;
        match self.position {
            Some(current) if candidate <= current => None,
            _ => Some(candidate),
        }
    }

    /// Moves the cursor to `position` if that is strictly forward.
    ///
    /// Returns `true` when the cursor moved.
    pub fn advance(&mut self, position: CursorPosition, at: DateTime<Utc>) -> bool {
        if self.next_position(Some(position)).is_none() {
            return false;
        }
        self.position = Some(position);
        self.updated_at = Some(at);
        true
    }
}
