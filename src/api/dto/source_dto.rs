//! Source status and control DTOs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::CursorPosition;
use crate::pipeline::RunReport;
use crate::scheduler::{Launch, SourceStatus};

/// Renders a cursor position as `YYYY-MM-DD HH:MM:SS#index`.
#[must_use]
pub fn format_position(position: &CursorPosition) -> String {
    format!("{} {}#{}", position.date, position.time, position.index)
}

/// Counters of the latest successful run.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunSummaryDto {
    /// Settings version the run used.
    pub settings_version: u64,
    /// Raw records fetched.
    pub records: usize,
    /// Records with an unmapped code.
    pub unmapped: usize,
    /// Records dropped by enablement policy.
    pub dropped_policy: usize,
    /// Records dropped by a failed precondition.
    pub dropped_precondition: usize,
    /// Events inserted.
    pub events_created: usize,
    /// Events merged by correlation key.
    pub events_updated: usize,
    /// Correlated records that changed nothing.
    pub events_unchanged: usize,
    /// Device rows written.
    pub devices_written: usize,
    /// Link, lock, and alarm flips.
    pub status_changes: usize,
}

impl From<&RunReport> for RunSummaryDto {
    fn from(r: &RunReport) -> Self {
        Self {
            settings_version: r.settings_version,
            records: r.records,
            unmapped: r.unmapped,
            dropped_policy: r.dropped_policy,
            dropped_precondition: r.dropped_precondition,
            events_created: r.events_created,
            events_updated: r.events_updated,
            events_unchanged: r.events_unchanged,
            devices_written: r.devices_written,
            status_changes: r.status_changes,
        }
    }
}

/// One entry of `GET /sources`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SourceStatusDto {
    /// Source name.
    pub name: String,
    /// Owning service (`access_control`, `emergency_call`).
    pub service: String,
    /// A run is in flight.
    pub running: bool,
    /// Start of the latest run.
    pub last_started: Option<DateTime<Utc>>,
    /// End of the latest run.
    pub last_finished: Option<DateTime<Utc>>,
    /// Error of the latest run, if it failed.
    pub last_error: Option<String>,
    /// Counters of the latest successful run.
    pub last_run: Option<RunSummaryDto>,
    /// Committed cursor position; absent for cursorless sources.
    pub cursor: Option<String>,
    /// Successful runs since start.
    pub runs_succeeded: u64,
    /// Failed runs since start.
    pub runs_failed: u64,
    /// Wake-ups skipped because a run was in flight.
    pub runs_skipped: u64,
}

impl SourceStatusDto {
    /// Builds the DTO from a scheduler status and the stored cursor.
    #[must_use]
    pub fn new(status: SourceStatus, cursor: Option<CursorPosition>) -> Self {
        Self {
            name: status.name,
            service: status.service.to_string(),
            running: status.running,
            last_started: status.last_started,
            last_finished: status.last_finished,
            last_error: status.last_error,
            last_run: status.last_report.as_ref().map(RunSummaryDto::from),
            cursor: cursor.as_ref().map(format_position),
            runs_succeeded: status.runs_succeeded,
            runs_failed: status.runs_failed,
            runs_skipped: status.runs_skipped,
        }
    }
}

/// Response body for `GET /sources`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SourceListResponse {
    /// Status of every registered source, ordered by name.
    pub data: Vec<SourceStatusDto>,
    /// Settings version currently published.
    pub settings_version: u64,
}

/// Response body for `POST /sources/{name}/trigger`.
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerResponse {
    /// Source name.
    pub source: String,
    /// `started`, `busy`, or `unconfigured`.
    pub outcome: String,
    /// Request timestamp.
    pub requested_at: DateTime<Utc>,
}

impl TriggerResponse {
    /// Builds the response for a launch attempt.
    #[must_use]
    pub fn new(source: &str, launch: &Launch) -> Self {
        let outcome = match launch {
            Launch::Started(_) => "started",
            Launch::Busy => "busy",
            Launch::Unconfigured => "unconfigured",
        };
        Self {
            source: source.to_string(),
            outcome: outcome.to_string(),
            requested_at: Utc::now(),
        }
    }
}

/// Response body for `POST /sources/reload`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    /// Newly published settings version.
    pub settings_version: u64,
    /// Sources that currently have connection settings.
    pub configured: Vec<String>,
}
