//! Notifications fanned out to dashboard observers.
//!
//! Every committed state change emits one or more [`Notification`]s
//! through the [`super::Notifier`]. Delivery is fire-and-forget: an
//! observer that is not connected when a notification is published never
//! sees it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{DeviceKey, EventId, MapPosition};

/// Structured SOP payload for workflow dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDispatch {
    /// Materialized event.
    pub event_id: EventId,
    /// Event-type id.
    pub event_type_id: i32,
    /// Workflow (SOP) to start.
    pub workflow_index: i32,
    /// Event name.
    pub event_name: String,
    /// Referenced device.
    pub device: DeviceKey,
    /// Device display name.
    pub device_name: String,
    /// Location label.
    pub location: String,
    /// Severity of the event.
    pub severity: i16,
    /// Start of the occurrence.
    pub occurred_at: DateTime<Utc>,
}

/// Display-ready payload for an operator popup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPopup {
    /// Materialized event.
    pub event_id: EventId,
    /// Event-type id.
    pub event_type_id: i32,
    /// Event name.
    pub event_name: String,
    /// Event description.
    pub description: String,
    /// Location label.
    pub location: String,
    /// Referenced device.
    pub device: DeviceKey,
    /// Device display name.
    pub device_name: String,
    /// Where to draw the device icon.
    pub position: MapPosition,
    /// Camera to open alongside the popup.
    pub camera_id: Option<String>,
    /// Severity of the event.
    pub severity: i16,
    /// Start of the occurrence.
    pub occurred_at: DateTime<Utc>,
}

/// Named notification published after a committed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum Notification {
    /// Devices were created or their identity changed.
    DeviceListChanged {
        /// Source that observed the devices.
        source: String,
        /// Number of devices upserted.
        upserted: usize,
        /// Publication timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An event row was created or updated.
    EventListChanged {
        /// Source that produced the event.
        source: String,
        /// Created or updated event.
        event_id: EventId,
        /// `true` for a new row, `false` for a correlated update.
        created: bool,
        /// Publication timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A workflow must be started for an event.
    WorkflowDispatch(WorkflowDispatch),

    /// An operator popup must be shown for an event.
    EventPopup(EventPopup),

    /// Alarm, link, or lock status flipped on some devices.
    DeviceStatusChanged {
        /// Source whose run caused the flips.
        source: String,
        /// Number of devices whose status flipped.
        changed: usize,
        /// Publication timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A downstream escalation message could not be delivered.
    DeliveryFailed {
        /// Event being escalated.
        event_id: EventId,
        /// Delivery channel (e.g. `"sms"`).
        channel: String,
        /// Recipient that was not reached.
        recipient: String,
        /// Failure description.
        reason: String,
        /// Publication timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// All notification names, in publication-order priority.
    pub const NAMES: [&'static str; 6] = [
        "device-list-changed",
        "event-list-changed",
        "workflow-dispatch",
        "event-popup",
        "device-status-changed",
        "delivery-failed",
    ];

    /// Returns the notification name as a static string slice.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DeviceListChanged { .. } => "device-list-changed",
            Self::EventListChanged { .. } => "event-list-changed",
            Self::WorkflowDispatch(_) => "workflow-dispatch",
            Self::EventPopup(_) => "event-popup",
            Self::DeviceStatusChanged { .. } => "device-status-changed",
            Self::DeliveryFailed { .. } => "delivery-failed",
        }
    }

    /// Event id carried by the notification, if it concerns one event.
    #[must_use]
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Self::EventListChanged { event_id, .. } | Self::DeliveryFailed { event_id, .. } => {
                Some(*event_id)
            }
            Self::WorkflowDispatch(d) => Some(d.event_id),
            Self::EventPopup(p) => Some(p.event_id),
            Self::DeviceListChanged { .. } | Self::DeviceStatusChanged { .. } => None,
        }
    }
}
