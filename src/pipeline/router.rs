//! Escalation router: committed outcomes → observer notifications.
//!
//! Called only after the run's transaction committed, in record order.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::domain::{EventPopup, Notification, Notifier, WorkflowDispatch};
use crate::escalation::{SmsGateway, SmsMessage};
use crate::persistence::EventOutcome;

use super::materializer::Materialized;

/// Publishes notifications for committed changes and fans out SMS.
#[derive(Debug, Clone)]
pub struct EscalationRouter {
    notifier: Notifier,
    sms: Arc<dyn SmsGateway>,
}

impl EscalationRouter {
    /// Creates a router publishing to `notifier` and sending SMS via `sms`.
    #[must_use]
    pub fn new(notifier: Notifier, sms: Arc<dyn SmsGateway>) -> Self {
        Self { notifier, sms }
    }

    /// Announces that devices were created or changed identity.
    pub fn device_list_changed(&self, source: &str, upserted: usize) {
        if upserted == 0 {
            return;
        }
        self.notifier.publish(Notification::DeviceListChanged {
            source: source.to_string(),
            upserted,
            timestamp: Utc::now(),
        });
    }

    /// Announces link, lock, or alarm flips.
    pub fn device_status_changed(&self, source: &str, changed: usize) {
        if changed == 0 {
            return;
        }
        self.notifier.publish(Notification::DeviceStatusChanged {
            source: source.to_string(),
            changed,
            timestamp: Utc::now(),
        });
    }

    /// Routes one committed event.
    ///
    /// Unchanged rows publish nothing. Workflow dispatch, popup, and SMS
    /// only fire for newly created rows; a correlated update only refreshes
    /// the event list.
    ///
    /// SMS recipients are contacted from a spawned task that outlives the
    /// call; a slow or failing gateway never delays the run. The returned
    /// handle of that task may be dropped without cancelling it.
    pub fn route_event(
        &self,
        source: &str,
        item: &Materialized,
        outcome: EventOutcome,
        sms_endpoint: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let (event_id, created) = match outcome {
            EventOutcome::Created(id) => (id, true),
            EventOutcome::Updated(id) => (id, false),
            EventOutcome::Unchanged => return None,
        };

        self.notifier.publish(Notification::EventListChanged {
            source: source.to_string(),
            event_id,
            created,
            timestamp: Utc::now(),
        });
        if !created {
            return None;
        }

        let event = &item.event;
        let config = &item.event_type;
        if let Some(workflow_index) = config.workflow() {
            tracing::info!(%event_id, workflow_index, "dispatching workflow");
            self.notifier
                .publish(Notification::WorkflowDispatch(WorkflowDispatch {
                    event_id,
                    event_type_id: event.event_type_id,
                    workflow_index,
                    event_name: event.name.clone(),
                    device: event.device.clone(),
                    device_name: item.device.name.clone(),
                    location: event.location.clone(),
                    severity: event.severity,
                    occurred_at: event.occurred_at,
                }));
        } else if config.use_popup
            && let Some(position) = item.device.map.clone()
        {
            self.notifier.publish(Notification::EventPopup(EventPopup {
                event_id,
                event_type_id: event.event_type_id,
                event_name: event.name.clone(),
                description: event.description.clone(),
                location: event.location.clone(),
                device: event.device.clone(),
                device_name: item.device.name.clone(),
                position,
                camera_id: item.device.camera_id.clone(),
                severity: event.severity,
                occurred_at: event.occurred_at,
            }));
        }

        let endpoint = sms_endpoint?;
        if config.sms_recipients.is_empty() {
            return None;
        }

        let text = format!(
            "[{}] {} at {}: {}",
            event.severity, event.name, event.location, event.description
        );
        let messages: Vec<SmsMessage> = config
            .sms_recipients
            .iter()
            .map(|to| SmsMessage {
                to: to.clone(),
                message: text.clone(),
            })
            .collect();
        let endpoint = endpoint.to_string();
        let sms = Arc::clone(&self.sms);
        let notifier = self.notifier.clone();

        Some(tokio::spawn(async move {
            let sends = messages.iter().map(|m| sms.send(&endpoint, m));
            let results = join_all(sends).await;
            for (message, result) in messages.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!(%event_id, recipient = %message.to, error = %e, "sms escalation failed");
                    notifier.publish(Notification::DeliveryFailed {
                        event_id,
                        channel: "sms".to_string(),
                        recipient: message.to.clone(),
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }))
    }
}
