//! Ingestion pipeline: one sequential run per source invocation.
//!
//! ```text
//! load cursor ─▶ adapter.fetch ─▶ classify ─▶ load snapshot
//!                                                  │
//!                  ┌───────────────────────────────┴──────┐
//!                  ▼                                      ▼
//!           reconcile devices                    materialize events
//!                  └──────────────┬───────────────────────┘
//!                                 ▼
//!                     store.commit (one transaction)
//!                                 ▼
//!                        route notifications
//! ```
//!
//! Nothing is published before the commit succeeded. A failed commit
//! leaves the store and the cursor untouched, so the next run reprocesses
//! the same window.

pub mod classifier;
pub mod materializer;
pub mod reconciler;
pub mod router;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

pub use classifier::{Bucket, Unmapped, classify};
pub use materializer::{Materialized, Materializer, Skip};
pub use reconciler::ReconcilePlan;
pub use router::EscalationRouter;

use crate::config::SourceSettings;
use crate::domain::{CursorPosition, DeviceKey};
use crate::error::PipelineError;
use crate::persistence::{CommitBatch, EventOutcome, FacilityStore, SnapshotRequest};
use crate::sources::SourceAdapter;

/// Counters of one committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Source name.
    pub source: String,
    /// Settings version the run used.
    pub settings_version: u64,
    /// Raw records fetched.
    pub records: usize,
    /// Records with an unmapped code.
    pub unmapped: usize,
    /// Records dropped by event-type or service enablement.
    pub dropped_policy: usize,
    /// Records dropped because the device is unregistered, off the map,
    /// or the record closes nothing.
    pub dropped_precondition: usize,
    /// Event rows inserted.
    pub events_created: usize,
    /// Event rows merged by correlation key.
    pub events_updated: usize,
    /// Correlated records that changed nothing.
    pub events_unchanged: usize,
    /// Device rows written.
    pub devices_written: usize,
    /// Link, lock, and alarm flips.
    pub status_changes: usize,
    /// Cursor position committed by this run, if it moved.
    pub cursor: Option<CursorPosition>,
}

/// Runs sources against a store and routes the results.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<dyn FacilityStore>,
    router: EscalationRouter,
    alarm_window: chrono::Duration,
}

impl Pipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn FacilityStore>,
        router: EscalationRouter,
        alarm_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            router,
            alarm_window,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FacilityStore> {
        &self.store
    }

    /// Executes one complete run of `adapter` under `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnreachable`] if the fetch fails and
    /// [`PipelineError::Persistence`] if the snapshot or the commit fails.
    /// In both cases nothing was written and nothing was published.
    pub async fn run_source(
        &self,
        adapter: &dyn SourceAdapter,
        settings: &SourceSettings,
    ) -> Result<RunReport, PipelineError> {
        let source = adapter.name();
        let service = adapter.service();

        let cursor = self.store.load_cursor(source).await?;
        let batch = adapter.fetch(&cursor, settings).await?;
        let mut report = RunReport {
            source: source.to_string(),
            settings_version: settings.version,
            records: batch.records.len(),
            ..RunReport::default()
        };

        let mut classified = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            match classify(record) {
                Ok(bucket) => classified.push((record, bucket)),
                Err(unmapped) => {
                    tracing::warn!(
                        source,
                        device = %record.device,
                        log_type = %unmapped.log_type,
                        status_code = unmapped.status_code,
                        "dropping record with unmapped code"
                    );
                    report.unmapped += 1;
                }
            }
        }

        let mut device_keys: Vec<DeviceKey> = batch
            .devices
            .iter()
            .map(|d| d.key.clone())
            .chain(batch.records.iter().map(|r| r.device.clone()))
            .collect();
        device_keys.sort();
        device_keys.dedup();
        let snapshot = self
            .store
            .load_snapshot(&SnapshotRequest {
                service,
                device_keys,
            })
            .await?;

        let plan = reconciler::plan(&snapshot.devices, &batch.devices);

        let mut materializer = Materializer::new(&snapshot);
        let mut items = Vec::with_capacity(classified.len());
        for (record, bucket) in classified {
            match materializer.materialize(record, bucket) {
                Ok(item) => items.push(item),
                Err(skip) if skip.is_policy() || skip == Skip::NoOpenOccurrence => {
                    tracing::debug!(source, device = %record.device, %bucket, reason = %skip, "record dropped");
                    if skip.is_policy() {
                        report.dropped_policy += 1;
                    } else {
                        report.dropped_precondition += 1;
                    }
                }
                Err(skip) => {
                    tracing::warn!(source, device = %record.device, %bucket, reason = %skip, "record dropped");
                    report.dropped_precondition += 1;
                }
            }
        }

        let now = Utc::now();
        let next_cursor = cursor.next_position(batch.last_position());
        let outcome = self
            .store
            .commit(CommitBatch {
                source: source.to_string(),
                service,
                devices: plan.writes,
                events: items.iter().map(|i| i.event.clone()).collect(),
                cursor: next_cursor,
                alarm_since: now - self.alarm_window,
                committed_at: now,
            })
            .await?;

        report.cursor = next_cursor;
        report.devices_written = outcome.devices_written;
        report.status_changes = plan.status_transitions + outcome.alarm_flips;

        if outcome.devices_written > 0 {
            self.router
                .device_list_changed(source, plan.identity_changes.min(outcome.devices_written));
        }
        for (item, event_outcome) in items.iter().zip(&outcome.events) {
            match event_outcome {
                EventOutcome::Created(_) => report.events_created += 1,
                EventOutcome::Updated(_) => report.events_updated += 1,
                EventOutcome::Unchanged => report.events_unchanged += 1,
            }
            let _ = self.router.route_event(
                source,
                item,
                *event_outcome,
                settings.sms_gateway_url.as_deref(),
            );
        }
        self.router.device_status_changed(source, report.status_changes);

        tracing::info!(
            source,
            records = report.records,
            created = report.events_created,
            updated = report.events_updated,
            devices = report.devices_written,
            status_changes = report.status_changes,
            "run committed"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use super::*;
    use crate::domain::{Notification, Notifier};
    use crate::persistence::MemoryStore;
    use crate::pipeline::router::tests::RecordingSms;
    use crate::test_support::{
        FlakyStore, ScriptedAdapter, access_record, call_record, event_type, mapped_door,
        observed_door, settings,
    };

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set_service_enabled(crate::domain::ServiceType::AccessControl, true)
            .await;
        store
            .set_service_enabled(crate::domain::ServiceType::EmergencyCall, true)
            .await;
        store.put_device(mapped_door("D1")).await;
        store.put_event_type(event_type(25, false, true)).await;
        store
    }

    fn pipeline(store: Arc<dyn FacilityStore>) -> (Pipeline, broadcast::Receiver<Notification>) {
        let notifier = Notifier::new(256);
        let rx = notifier.subscribe();
        let router = EscalationRouter::new(notifier, Arc::new(RecordingSms::default()));
        (
            Pipeline::new(store, router, chrono::Duration::hours(24)),
            rx,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn count(notifications: &[Notification], name: &str) -> usize {
        notifications.iter().filter(|n| n.name() == name).count()
    }

    #[tokio::test]
    async fn forced_open_creates_one_event_and_one_popup() {
        let store = seeded_store().await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D1", 1)]);

        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.events_created, 1);
        assert_eq!(store.events().await.len(), 1);

        let notifications = drain(&mut rx);
        assert_eq!(count(&notifications, "device-status-changed"), 1);
        assert_eq!(count(&notifications, "event-list-changed"), 1);
        let popups: Vec<_> = notifications
            .iter()
            .filter_map(|n| match n {
                Notification::EventPopup(p) => Some(p),
                _ => None,
            })
            .collect();
        let [popup] = popups.as_slice() else {
            panic!("expected exactly one popup, got {notifications:?}");
        };
        assert_eq!(popup.device.device_id, "D1");
        assert!((popup.position.x - 10.0).abs() < f64::EPSILON);
        assert!((popup.position.y - 20.0).abs() < f64::EPSILON);

        let Some(device) = store.device(&mapped_door("D1").key).await else {
            panic!("device missing");
        };
        assert!(device.alarm_status);
    }

    async fn raise_alarm(store: &Arc<MemoryStore>, pipeline: &Pipeline) {
        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D1", 1)]);
        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.status_changes, 1);
        assert!(store.device(&mapped_door("D1").key).await.is_some_and(|d| d.alarm_status));
    }

    #[tokio::test]
    async fn acknowledged_event_clears_alarm() {
        let store = seeded_store().await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        raise_alarm(&store, &pipeline).await;
        let _ = drain(&mut rx);

        let Some(event) = store.events().await.into_iter().next() else {
            panic!("event missing");
        };
        assert!(store.acknowledge(event.id).await);

        let idle = ScriptedAdapter::access(Vec::new());
        let Ok(report) = pipeline.run_source(&idle, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.status_changes, 1);
        let notifications = drain(&mut rx);
        assert_eq!(count(&notifications, "device-status-changed"), 1);
        assert_eq!(notifications.len(), 1);
        assert!(store.device(&mapped_door("D1").key).await.is_some_and(|d| !d.alarm_status));
    }

    #[tokio::test]
    async fn event_leaving_the_window_clears_alarm() {
        let store = seeded_store().await;
        let (wide, _rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        raise_alarm(&store, &wide).await;

        // fixture events are minutes old, so a one-minute window excludes them
        let notifier = Notifier::new(16);
        let mut rx = notifier.subscribe();
        let narrow = Pipeline::new(
            Arc::clone(&store) as Arc<dyn FacilityStore>,
            EscalationRouter::new(notifier, Arc::new(RecordingSms::default())),
            chrono::Duration::minutes(1),
        );
        let idle = ScriptedAdapter::access(Vec::new());
        let Ok(report) = narrow.run_source(&idle, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.status_changes, 1);
        assert_eq!(count(&drain(&mut rx), "device-status-changed"), 1);
        assert!(store.device(&mapped_door("D1").key).await.is_some_and(|d| !d.alarm_status));
    }

    #[tokio::test]
    async fn failed_commit_keeps_cursor_and_retry_does_not_duplicate() {
        let memory = seeded_store().await;
        let flaky = Arc::new(FlakyStore::new(Arc::clone(&memory), 1));
        let (pipeline, mut rx) = pipeline(Arc::clone(&flaky) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D1", 1)]);

        let first = pipeline.run_source(&adapter, &settings()).await;
        assert!(matches!(first, Err(PipelineError::Persistence(_))));
        assert!(drain(&mut rx).is_empty());
        let Ok(cursor) = memory.load_cursor("access_control").await else {
            panic!("cursor load failed");
        };
        assert_eq!(cursor.position, None);

        // the scripted adapter ignores the cursor and replays the same window
        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("retry failed");
        };
        assert_eq!(report.events_created, 1);
        assert_eq!(memory.events().await.len(), 1);
        assert!(report.cursor.is_some());
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let store = seeded_store().await;
        let (pipeline, _rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);

        let forward = ScriptedAdapter::access(vec![access_record("access", 1, "D1", 5)]);
        let Ok(first) = pipeline.run_source(&forward, &settings()).await else {
            panic!("run failed");
        };
        let Some(after_first) = first.cursor else {
            panic!("cursor should move");
        };

        let stale = ScriptedAdapter::access(vec![access_record("access", 1, "D1", 2)]);
        let Ok(second) = pipeline.run_source(&stale, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(second.cursor, None);

        let Ok(cursor) = store.load_cursor("access_control").await else {
            panic!("cursor load failed");
        };
        assert_eq!(cursor.position, Some(after_first));
    }

    #[tokio::test]
    async fn unregistered_map_position_produces_nothing() {
        let store = seeded_store().await;
        let mut unmapped = mapped_door("D2");
        unmapped.map = None;
        store.put_device(unmapped).await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);

        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D2", 1)]);
        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.dropped_precondition, 1);
        assert!(store.events().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn identical_repoll_is_silent() {
        let store = seeded_store().await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(Vec::new())
            .with_devices(vec![observed_door("D1", 1), observed_door("D9", 0)]);

        let Ok(first) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert!(first.devices_written > 0);
        let _ = drain(&mut rx);

        let Ok(second) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(second.devices_written, 0);
        assert_eq!(second.status_changes, 0);
        let notifications = drain(&mut rx);
        assert_eq!(count(&notifications, "device-status-changed"), 0);
        assert_eq!(count(&notifications, "device-list-changed"), 0);
    }

    #[tokio::test]
    async fn call_updates_collapse_into_one_event() {
        let store = seeded_store().await;
        let mut terminal = mapped_door("T1");
        terminal.key.device_type = crate::domain::DeviceType::EmergencyTerminal;
        terminal.service = crate::domain::ServiceType::EmergencyCall;
        store.put_device(terminal).await;
        let mut call_type = event_type(40, false, true);
        call_type.service = crate::domain::ServiceType::EmergencyCall;
        store.put_event_type(call_type).await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);

        let active = ScriptedAdapter::emergency(vec![call_record(1, "T1", "c-1")]);
        let ended = ScriptedAdapter::emergency(vec![call_record(3, "T1", "c-1")]);

        let Ok(first) = pipeline.run_source(&active, &settings()).await else {
            panic!("run failed");
        };
        let Ok(second) = pipeline.run_source(&ended, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(first.events_created, 1);
        assert_eq!(second.events_updated, 1);

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert!(events.first().is_some_and(|e| e.ended_at.is_some()));

        let notifications = drain(&mut rx);
        assert_eq!(count(&notifications, "event-popup"), 1);
        assert_eq!(count(&notifications, "event-list-changed"), 2);

        // a full re-pull of the ended call changes nothing
        let Ok(third) = pipeline.run_source(&ended, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(third.events_unchanged, 1);
        assert_eq!(count(&drain(&mut rx), "event-list-changed"), 0);
    }

    #[tokio::test]
    async fn sop_event_type_never_pops_up() {
        let store = seeded_store().await;
        store.put_event_type(event_type(25, true, true)).await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D1", 1)]);

        let Ok(_) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        let notifications = drain(&mut rx);
        assert_eq!(count(&notifications, "workflow-dispatch"), 1);
        assert_eq!(count(&notifications, "event-popup"), 0);
    }

    #[tokio::test]
    async fn unmapped_codes_are_counted_and_batch_continues() {
        let store = seeded_store().await;
        let (pipeline, _rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(vec![
            access_record("door", 99, "D1", 1),
            access_record("door", 1, "D1", 2),
        ]);

        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.unmapped, 1);
        assert_eq!(report.events_created, 1);
        assert!(report.cursor.is_some());
    }

    #[tokio::test]
    async fn disabled_service_drops_by_policy() {
        let store = seeded_store().await;
        store
            .set_service_enabled(crate::domain::ServiceType::AccessControl, false)
            .await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::access(vec![access_record("door", 1, "D1", 1)]);

        let Ok(report) = pipeline.run_source(&adapter, &settings()).await else {
            panic!("run failed");
        };
        assert_eq!(report.dropped_policy, 1);
        assert!(store.events().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unreachable_source_writes_nothing() {
        let store = seeded_store().await;
        let (pipeline, mut rx) = pipeline(Arc::clone(&store) as Arc<dyn FacilityStore>);
        let adapter = ScriptedAdapter::failing("access_control");

        let result = pipeline.run_source(&adapter, &settings()).await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnreachable { .. })
        ));
        assert!(drain(&mut rx).is_empty());
    }
}
