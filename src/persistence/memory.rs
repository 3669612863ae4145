//! In-memory store with the same conflict semantics as PostgreSQL.
//!
//! Commits are applied to a copy of the state and swapped in only when the
//! whole batch succeeded, mirroring transaction rollback.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{
    CommitBatch, CommitOutcome, DeviceWrite, EventOutcome, SnapshotRequest, StoreSnapshot,
};
use super::FacilityStore;
use crate::domain::{
    Device, DeviceKey, Event, EventId, EventTypeConfig, NewEvent, PollCursor, ServiceType,
};
use crate::error::PipelineError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    devices: BTreeMap<DeviceKey, Device>,
    event_types: BTreeMap<i32, EventTypeConfig>,
    services: HashMap<ServiceType, bool>,
    events: Vec<Event>,
    cursors: HashMap<String, PollCursor>,
    next_event_id: i64,
}

/// Store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store. All services start disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a complete device row, curated fields included.
    pub async fn put_device(&self, device: Device) {
        let mut state = self.state.write().await;
        state.devices.insert(device.key.clone(), device);
    }

    /// Inserts or replaces an event-type configuration.
    pub async fn put_event_type(&self, config: EventTypeConfig) {
        let mut state = self.state.write().await;
        state.event_types.insert(config.id, config);
    }

    /// Enables or disables a service.
    pub async fn set_service_enabled(&self, service: ServiceType, enabled: bool) {
        let mut state = self.state.write().await;
        state.services.insert(service, enabled);
    }

    /// Marks an event as acknowledged, as an operator would.
    ///
    /// Returns `false` if no such event exists.
    pub async fn acknowledge(&self, id: EventId) -> bool {
        let mut state = self.state.write().await;
        match state.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Returns a copy of all stored events in insertion order.
    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Returns a copy of a stored device.
    pub async fn device(&self, key: &DeviceKey) -> Option<Device> {
        self.state.read().await.devices.get(key).cloned()
    }
}

impl MemoryState {
    fn write_device(&mut self, write: &DeviceWrite) -> bool {
        match self.devices.get_mut(&write.key) {
            Some(existing) => {
                let unchanged = existing.name == write.name
                    && existing.ip == write.ip
                    && existing.linked_status == write.linked_status
                    && existing.is_lock == write.is_lock;
                if unchanged {
                    return false;
                }
                existing.name.clone_from(&write.name);
                existing.ip.clone_from(&write.ip);
                existing.linked_status = write.linked_status;
                existing.is_lock = write.is_lock;
                true
            }
            None => {
                self.devices.insert(
                    write.key.clone(),
                    Device {
                        key: write.key.clone(),
                        name: write.name.clone(),
                        ip: write.ip.clone(),
                        service: write.service,
                        map: None,
                        outside_area: None,
                        inside_area: None,
                        linked_status: write.linked_status,
                        is_lock: write.is_lock,
                        alarm_status: false,
                        camera_id: None,
                    },
                );
                true
            }
        }
    }

    fn write_event(&mut self, event: NewEvent) -> EventOutcome {
        if let Some(key) = event.correlation_key.as_deref()
            && let Some(existing) = self
                .events
                .iter_mut()
                .find(|e| e.correlation_key.as_deref() == Some(key))
        {
            let ended_at = event.ended_at.or(existing.ended_at);
            if existing.description == event.description && existing.ended_at == ended_at {
                return EventOutcome::Unchanged;
            }
            existing.description = event.description;
            existing.ended_at = ended_at;
            return EventOutcome::Updated(existing.id);
        }

        self.next_event_id = self.next_event_id.saturating_add(1);
        let id = EventId::new(self.next_event_id);
        self.events.push(event.into_event(id));
        EventOutcome::Created(id)
    }

    fn derive_alarms(&mut self, service: ServiceType, since: DateTime<Utc>) -> usize {
        let mut flips = 0;
        for device in self.devices.values_mut().filter(|d| d.service == service) {
            let alarm = self.events.iter().any(|e| {
                e.device == device.key
                    && !e.acknowledged
                    && e.occurred_at >= since
                    && self
                        .event_types
                        .get(&e.event_type_id)
                        .is_some_and(|t| t.enabled)
            });
            if device.alarm_status != alarm {
                device.alarm_status = alarm;
                flips += 1;
            }
        }
        flips
    }
}

#[async_trait]
impl FacilityStore for MemoryStore {
    async fn load_cursor(&self, source: &str) -> Result<PollCursor, PipelineError> {
        let state = self.state.read().await;
        Ok(state
            .cursors
            .get(source)
            .cloned()
            .unwrap_or_else(|| PollCursor::empty(source)))
    }

    async fn load_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<StoreSnapshot, PipelineError> {
        let state = self.state.read().await;

        let devices = request
            .device_keys
            .iter()
            .filter_map(|key| state.devices.get(key).map(|d| (key.clone(), d.clone())))
            .collect();

        // newest open occurrence per (device, event type)
        let mut newest: HashMap<(DeviceKey, i32), &Event> = HashMap::new();
        for event in state.events.iter().filter(|e| e.ended_at.is_none()) {
            if event.correlation_key.is_none() || !request.device_keys.contains(&event.device) {
                continue;
            }
            newest
                .entry((event.device.clone(), event.event_type_id))
                .and_modify(|current| {
                    if event.occurred_at > current.occurred_at {
                        *current = event;
                    }
                })
                .or_insert(event);
        }
        let open_correlations = newest
            .into_iter()
            .filter_map(|(slot, event)| event.correlation_key.clone().map(|key| (slot, key)))
            .collect();

        Ok(StoreSnapshot {
            devices,
            event_types: state
                .event_types
                .iter()
                .map(|(id, t)| (*id, t.clone()))
                .collect(),
            services: state.services.clone(),
            open_correlations,
        })
    }

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, PipelineError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();

        let devices_written = batch
            .devices
            .iter()
            .filter(|write| next.write_device(write))
            .count();

        let events = batch
            .events
            .into_iter()
            .map(|event| next.write_event(event))
            .collect();

        let alarm_flips = next.derive_alarms(batch.service, batch.alarm_since);

        if let Some(position) = batch.cursor {
            next.cursors
                .entry(batch.source.clone())
                .or_insert_with(|| PollCursor::empty(batch.source.clone()))
                .advance(position, batch.committed_at);
        }

        *guard = next;
        Ok(CommitOutcome {
            events,
            devices_written,
            alarm_flips,
        })
    }
}
