//! Event materializer: classified record + live configuration → canonical
//! event, or a reason to drop the record.

use std::collections::HashMap;
use std::fmt;

use crate::domain::{Device, DeviceKey, EventTypeConfig, NewEvent, RawLogRecord};
use crate::persistence::StoreSnapshot;

use super::classifier::{Bucket, DoorOpenPhase};

/// Why a classified record produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Skip {
    /// No configuration exists for the bucket's event-type id.
    UnknownEventType,
    /// The event type is disabled.
    EventTypeDisabled,
    /// The service owning the event type is disabled.
    ServiceDisabled,
    /// The referenced device is not stored.
    DeviceUnregistered,
    /// The referenced device has no map position.
    DeviceNotOnMap,
    /// An end record arrived without a matching open occurrence.
    NoOpenOccurrence,
}

impl Skip {
    /// Whether this skip is a configuration decision rather than a
    /// precondition failure.
    #[must_use]
    pub const fn is_policy(self) -> bool {
        matches!(
            self,
            Self::UnknownEventType | Self::EventTypeDisabled | Self::ServiceDisabled
        )
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownEventType => "event type not configured",
            Self::EventTypeDisabled => "event type disabled",
            Self::ServiceDisabled => "service disabled",
            Self::DeviceUnregistered => "device not registered",
            Self::DeviceNotOnMap => "device has no map position",
            Self::NoOpenOccurrence => "no open occurrence to close",
        };
        f.write_str(s)
    }
}

/// A record that passed every policy and precondition check.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    /// Event to insert or merge.
    pub event: NewEvent,
    /// Referenced device, registered and on the map.
    pub device: Device,
    /// Live configuration used for defaults and routing.
    pub event_type: EventTypeConfig,
}

/// Stateful over one batch: tracks occurrences opened earlier in the same
/// batch so that a start and its end collapse onto one correlation key.
#[derive(Debug)]
pub struct Materializer<'a> {
    snapshot: &'a StoreSnapshot,
    open: HashMap<(DeviceKey, i32), String>,
}

impl<'a> Materializer<'a> {
    /// Starts a batch from the store snapshot.
    #[must_use]
    pub fn new(snapshot: &'a StoreSnapshot) -> Self {
        Self {
            snapshot,
            open: snapshot.open_correlations.clone(),
        }
    }

    /// Materializes one classified record.
    ///
    /// # Errors
    ///
    /// Returns the [`Skip`] reason when the record must be dropped.
    pub fn materialize(
        &mut self,
        record: &RawLogRecord,
        bucket: Bucket,
    ) -> Result<Materialized, Skip> {
        let type_id = bucket.event_type_id();
        let event_type = self
            .snapshot
            .event_types
            .get(&type_id)
            .ok_or(Skip::UnknownEventType)?;
        if !event_type.enabled {
            return Err(Skip::EventTypeDisabled);
        }
        if !self.snapshot.service_enabled(event_type.service) {
            return Err(Skip::ServiceDisabled);
        }

        let device = self
            .snapshot
            .devices
            .get(&record.device)
            .ok_or(Skip::DeviceUnregistered)?;
        if device.map.is_none() {
            return Err(Skip::DeviceNotOnMap);
        }

        let correlation_key = self.correlation_key(record, bucket)?;
        let ended_at = if bucket.is_end() {
            record.ended_at.or(Some(record.occurred_at))
        } else {
            record.ended_at
        };

        let event = NewEvent {
            name: event_type.name.clone(),
            description: describe(bucket, record),
            location: device.location_label(),
            device: device.key.clone(),
            event_type_id: type_id,
            occurred_at: record.occurred_at,
            ended_at,
            severity: event_type.severity,
            correlation_key,
        };

        Ok(Materialized {
            event,
            device: device.clone(),
            event_type: event_type.clone(),
        })
    }

    fn correlation_key(
        &mut self,
        record: &RawLogRecord,
        bucket: Bucket,
    ) -> Result<Option<String>, Skip> {
        let slot = (record.device.clone(), bucket.event_type_id());
        match bucket {
            Bucket::EmergencyCall(_) => Ok(record
                .correlation_token
                .as_deref()
                .map(|token| format!("call:{token}"))),
            Bucket::DoorOpenTooLong(DoorOpenPhase::Start) => {
                let key = format!(
                    "door-open:{}:{}",
                    record.device,
                    record.occurred_at.timestamp()
                );
                self.open.insert(slot, key.clone());
                Ok(Some(key))
            }
            Bucket::DoorOpenTooLong(DoorOpenPhase::End) => {
                self.open.remove(&slot).map(Some).ok_or(Skip::NoOpenOccurrence)
            }
            _ => Ok(None),
        }
    }
}

fn describe(bucket: Bucket, record: &RawLogRecord) -> String {
    let who = record
        .payload_str("user_name")
        .or_else(|| record.payload_str("card_no"))
        .or_else(|| record.payload_str("caller"));
    match who {
        Some(who) => format!("{} ({who})", bucket.label()),
        None => bucket.label().to_string(),
    }
}
