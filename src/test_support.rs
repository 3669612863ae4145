//! Shared fixtures for unit tests: scripted adapters, a store that fails on
//! demand, and canned devices, event types, and records.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::config::{SourceSettings, test_settings};
use crate::domain::{
    ChannelStatus, CursorPosition, Device, DeviceKey, DeviceType, EventTypeConfig, MapPosition,
    ObservedDevice, PollCursor, RawLogRecord, ServiceType, SourceBatch,
};
use crate::error::PipelineError;
use crate::persistence::{
    CommitBatch, CommitOutcome, FacilityStore, MemoryStore, SnapshotRequest, StoreSnapshot,
};
use crate::sources::SourceAdapter;

pub(crate) fn settings() -> SourceSettings {
    test_settings()
}

/// Shared occurrence time of every fixture record: a few minutes ago, so
/// fixture events always fall inside the alarm window. Fixed once per test
/// process so repeated pulls of the same record stay identical.
fn base_time() -> DateTime<Utc> {
    static BASE: OnceLock<DateTime<Utc>> = OnceLock::new();
    *BASE.get_or_init(|| Utc::now() - chrono::Duration::minutes(5))
}

/// Adapter returning the same batch on every fetch.
#[derive(Debug)]
pub(crate) struct ScriptedAdapter {
    name: String,
    service: ServiceType,
    batch: Option<SourceBatch>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl ScriptedAdapter {
    pub(crate) fn access(records: Vec<RawLogRecord>) -> Self {
        Self::new("access_control", ServiceType::AccessControl, records)
    }

    pub(crate) fn emergency(records: Vec<RawLogRecord>) -> Self {
        Self::new("emergency_call", ServiceType::EmergencyCall, records)
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            batch: None,
            ..Self::new(name, ServiceType::AccessControl, Vec::new())
        }
    }

    fn new(name: &str, service: ServiceType, records: Vec<RawLogRecord>) -> Self {
        Self {
            name: name.to_string(),
            service,
            batch: Some(SourceBatch {
                devices: Vec::new(),
                records,
            }),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_devices(mut self, devices: Vec<ObservedDevice>) -> Self {
        if let Some(batch) = self.batch.as_mut() {
            batch.devices = devices;
        }
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> ServiceType {
        self.service
    }

    fn configured(&self, _settings: &SourceSettings) -> bool {
        true
    }

    fn interval(&self, _settings: &SourceSettings) -> Duration {
        Duration::from_secs(3600)
    }

    async fn fetch(
        &self,
        _cursor: &PollCursor,
        _settings: &SourceSettings,
    ) -> Result<SourceBatch, PipelineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batch
            .clone()
            .ok_or_else(|| PipelineError::unreachable(&self.name, "scripted failure"))
    }
}

/// Store delegating to a [`MemoryStore`] whose first `failures` commits
/// fail without applying anything.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl FacilityStore for FlakyStore {
    async fn load_cursor(&self, source: &str) -> Result<PollCursor, PipelineError> {
        self.inner.load_cursor(source).await
    }

    async fn load_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<StoreSnapshot, PipelineError> {
        self.inner.load_snapshot(request).await
    }

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, PipelineError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Persistence("simulated write failure".to_string()));
        }
        self.inner.commit(batch).await
    }
}

pub(crate) fn mapped_door(id: &str) -> Device {
    Device {
        key: DeviceKey::new(id, DeviceType::Door),
        name: format!("Door {id}"),
        ip: Some("10.0.0.2".to_string()),
        service: ServiceType::AccessControl,
        map: Some(MapPosition {
            building: "HQ".to_string(),
            floor: "1F".to_string(),
            x: 10.0,
            y: 20.0,
        }),
        outside_area: Some("Corridor".to_string()),
        inside_area: Some("Lobby".to_string()),
        linked_status: true,
        is_lock: Some(true),
        alarm_status: false,
        camera_id: Some("CAM-1".to_string()),
    }
}

pub(crate) fn observed_door(id: &str, link_word: u32) -> ObservedDevice {
    ObservedDevice {
        key: DeviceKey::new(id, DeviceType::Door),
        name: format!("Door {id}"),
        ip: Some("10.0.0.2".to_string()),
        service: ServiceType::AccessControl,
        status: ChannelStatus {
            channel: 0,
            link_word,
            lock_word: Some(1),
        },
    }
}

pub(crate) fn event_type(id: i32, use_sop: bool, use_popup: bool) -> EventTypeConfig {
    EventTypeConfig {
        id,
        name: format!("Event type {id}"),
        severity: 3,
        enabled: true,
        use_sop,
        workflow_index: Some(1),
        use_popup,
        service: ServiceType::AccessControl,
        sms_recipients: Vec::new(),
    }
}

pub(crate) fn access_record(log_type: &str, code: i32, device: &str, index: i64) -> RawLogRecord {
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap_or_default();
    let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
    RawLogRecord {
        log_type: log_type.to_string(),
        status_code: code,
        device: DeviceKey::new(device, DeviceType::Door),
        occurred_at: base_time(),
        ended_at: None,
        position: Some(CursorPosition::new(date, time, index)),
        correlation_token: None,
        payload: serde_json::json!({ "card_no": "0042" }),
    }
}

pub(crate) fn call_record(code: i32, terminal: &str, call_id: &str) -> RawLogRecord {
    RawLogRecord {
        log_type: "call".to_string(),
        status_code: code,
        device: DeviceKey::new(terminal, DeviceType::EmergencyTerminal),
        occurred_at: base_time(),
        ended_at: None,
        position: None,
        correlation_token: Some(call_id.to_string()),
        payload: serde_json::json!({ "caller": terminal }),
    }
}
