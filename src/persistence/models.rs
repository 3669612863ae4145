//! Data exchanged with a [`super::FacilityStore`] and raw database rows.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::domain::{
    CursorPosition, Device, DeviceKey, EventId, EventTypeConfig, MapPosition, NewEvent,
    ServiceType,
};

/// What a run needs to know before it can classify and materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Service of the running source.
    pub service: ServiceType,
    /// Every device referenced by the batch, records and metadata alike.
    pub device_keys: Vec<DeviceKey>,
}

/// Everything a run reads from the store, fetched in one round of queries
/// before the classification loop.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Stored devices among the requested keys.
    pub devices: HashMap<DeviceKey, Device>,
    /// All event-type configurations by id.
    pub event_types: HashMap<i32, EventTypeConfig>,
    /// Service enablement flags. Missing services count as disabled.
    pub services: HashMap<ServiceType, bool>,
    /// Correlation key of the latest still-open event per device and
    /// event type.
    pub open_correlations: HashMap<(DeviceKey, i32), String>,
}

impl StoreSnapshot {
    /// Whether the given service is enabled.
    #[must_use]
    pub fn service_enabled(&self, service: ServiceType) -> bool {
        self.services.get(&service).copied().unwrap_or(false)
    }
}

/// Adapter-owned device fields to upsert. Curated fields are not part of
/// a write and are therefore never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceWrite {
    /// Device identity.
    pub key: DeviceKey,
    /// Name reported by the source.
    pub name: String,
    /// Address reported by the source.
    pub ip: Option<String>,
    /// Owning service.
    pub service: ServiceType,
    /// Decoded link status.
    pub linked_status: bool,
    /// Decoded lock status.
    pub is_lock: Option<bool>,
}

/// All writes of one run, applied atomically.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    /// Source name, also the cursor key.
    pub source: String,
    /// Service whose device alarm status is re-derived.
    pub service: ServiceType,
    /// Device upserts.
    pub devices: Vec<DeviceWrite>,
    /// Events to insert or merge, in record order.
    pub events: Vec<NewEvent>,
    /// New cursor position, `None` to leave the cursor alone.
    pub cursor: Option<CursorPosition>,
    /// Lower bound of the alarm derivation window.
    pub alarm_since: DateTime<Utc>,
    /// Commit timestamp.
    pub committed_at: DateTime<Utc>,
}

/// Result of one event insert-or-merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "event_id", rename_all = "snake_case")]
pub enum EventOutcome {
    /// A new row was inserted.
    Created(EventId),
    /// An existing row with the same correlation key was updated.
    Updated(EventId),
    /// An existing row already carried identical values.
    Unchanged,
}

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// One outcome per [`CommitBatch::events`] entry, same order.
    pub events: Vec<EventOutcome>,
    /// Device rows actually inserted or updated.
    pub devices_written: usize,
    /// Devices whose derived alarm status flipped.
    pub alarm_flips: usize,
}

/// Row of the `devices` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DeviceRow {
    pub device_id: String,
    pub device_type: String,
    pub name: String,
    pub ip: Option<String>,
    pub service: String,
    pub map_building: Option<String>,
    pub map_floor: Option<String>,
    pub map_x: Option<f64>,
    pub map_y: Option<f64>,
    pub outside_area: Option<String>,
    pub inside_area: Option<String>,
    pub linked_status: bool,
    pub is_lock: Option<bool>,
    pub alarm_status: bool,
    pub camera_id: Option<String>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = String;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        let map = match (row.map_building, row.map_floor, row.map_x, row.map_y) {
            (Some(building), Some(floor), Some(x), Some(y)) => Some(MapPosition {
                building,
                floor,
                x,
                y,
            }),
            _ => None,
        };
        Ok(Self {
            key: DeviceKey::new(row.device_id, row.device_type.parse()?),
            name: row.name,
            ip: row.ip,
            service: row.service.parse()?,
            map,
            outside_area: row.outside_area,
            inside_area: row.inside_area,
            linked_status: row.linked_status,
            is_lock: row.is_lock,
            alarm_status: row.alarm_status,
            camera_id: row.camera_id,
        })
    }
}

/// Row of the `event_types` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventTypeRow {
    pub id: i32,
    pub name: String,
    pub severity: i16,
    pub enabled: bool,
    pub use_sop: bool,
    pub workflow_index: Option<i32>,
    pub use_popup: bool,
    pub service: String,
    pub sms_recipients: Vec<String>,
}

impl TryFrom<EventTypeRow> for EventTypeConfig {
    type Error = String;

    fn try_from(row: EventTypeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            severity: row.severity,
            enabled: row.enabled,
            use_sop: row.use_sop,
            workflow_index: row.workflow_index,
            use_popup: row.use_popup,
            service: row.service.parse()?,
            sms_recipients: row.sms_recipients,
        })
    }
}

/// Row of the `poll_cursors` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CursorRow {
    pub last_date: NaiveDate,
    pub last_time: NaiveTime,
    pub last_index: i64,
    pub updated_at: DateTime<Utc>,
}
