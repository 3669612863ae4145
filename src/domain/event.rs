//! Canonical facility events and their operator-managed configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceKey;

/// Identifier of a stored [`Event`] row.
///
/// Newtype over the store's `BIGSERIAL` id so event ids cannot be mixed up
/// with event-type ids or source indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wraps a raw row id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subsystem owning a device or an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Legacy access-control terminals.
    AccessControl,
    /// Emergency-call devices.
    EmergencyCall,
}

impl ServiceType {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessControl => "access_control",
            Self::EmergencyCall => "emergency_call",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_control" => Ok(Self::AccessControl),
            "emergency_call" => Ok(Self::EmergencyCall),
            other => Err(format!("unknown service type: {other}")),
        }
    }
}

/// Operator-configured event classification. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeConfig {
    /// Numeric event-type id, matched against classifier buckets.
    pub id: i32,
    /// Display name used as the default event name.
    pub name: String,
    /// Severity level copied onto events.
    pub severity: i16,
    /// Disabled types never produce events.
    pub enabled: bool,
    /// Dispatch a workflow (SOP) instead of a popup.
    pub use_sop: bool,
    /// Workflow to dispatch when `use_sop` is set.
    pub workflow_index: Option<i32>,
    /// Show an operator popup.
    pub use_popup: bool,
    /// Service owning this event type.
    pub service: ServiceType,
    /// SMS escalation recipients (phone numbers).
    pub sms_recipients: Vec<String>,
}

impl EventTypeConfig {
    /// Workflow index to dispatch, if this type escalates through an SOP.
    #[must_use]
    pub fn workflow(&self) -> Option<i32> {
        if self.use_sop { self.workflow_index } else { None }
    }
}

/// Stored event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Row id.
    pub id: EventId,
    /// Event name (defaults to the event-type name).
    pub name: String,
    /// Free-text description; updated in place on correlated updates.
    pub description: String,
    /// Location label computed from the device's areas.
    pub location: String,
    /// Referenced device.
    pub device: DeviceKey,
    /// Event-type id.
    pub event_type_id: i32,
    /// Start of the occurrence.
    pub occurred_at: DateTime<Utc>,
    /// End of the occurrence, when known.
    pub ended_at: Option<DateTime<Utc>>,
    /// Severity copied from the event type.
    pub severity: i16,
    /// Set by an operator action outside the pipeline.
    pub acknowledged: bool,
    /// Shared by partial updates of one logical occurrence.
    pub correlation_key: Option<String>,
}

/// Event about to be inserted or merged by correlation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Location label.
    pub location: String,
    /// Referenced device.
    pub device: DeviceKey,
    /// Event-type id.
    pub event_type_id: i32,
    /// Start of the occurrence.
    pub occurred_at: DateTime<Utc>,
    /// End of the occurrence, when known.
    pub ended_at: Option<DateTime<Utc>>,
    /// Severity.
    pub severity: i16,
    /// Merge key; `None` always inserts.
    pub correlation_key: Option<String>,
}

impl NewEvent {
    /// Turns this pending event into a stored row with the given id.
    #[must_use]
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            name: self.name,
            description: self.description,
            location: self.location,
            device: self.device,
            event_type_id: self.event_type_id,
            occurred_at: self.occurred_at,
            ended_at: self.ended_at,
            severity: self.severity,
            acknowledged: false,
            correlation_key: self.correlation_key,
        }
    }
}
