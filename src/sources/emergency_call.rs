//! Push-triggered adapter for the emergency-call service.
//!
//! Two halves:
//!
//! - [`EmergencyCallAdapter`] performs the pull: the full terminal list,
//!   then every outstanding call, over HTTP. The service exposes no
//!   cursor, so every pull is a full differential fetch and duplicate
//!   suppression is left to the store's correlation upsert.
//! - [`SignalListener`] keeps a WebSocket open to the service's signal
//!   endpoint. `connect` and `data changed` wake the source's trigger;
//!   the scheduler turns the wake-up into a guarded run. The socket
//!   reconnects on a fixed delay until cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::SourceAdapter;
use crate::config::{SettingsHandle, SourceSettings};
use crate::domain::{
    ChannelStatus, DeviceKey, DeviceType, ObservedDevice, PollCursor, RawLogRecord, ServiceType,
    SourceBatch,
};
use crate::error::PipelineError;

/// Source name and cursor key.
pub const SOURCE_NAME: &str = "emergency_call";

/// Terminal as listed by `GET /api/devices`.
#[derive(Debug, Clone, Deserialize)]
struct TerminalDto {
    terminal_id: String,
    name: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    online: bool,
}

impl From<TerminalDto> for ObservedDevice {
    fn from(dto: TerminalDto) -> Self {
        Self {
            key: DeviceKey::new(dto.terminal_id, DeviceType::EmergencyTerminal),
            name: dto.name,
            ip: dto.ip,
            service: ServiceType::EmergencyCall,
            status: ChannelStatus::from_flags(dto.online, None),
        }
    }
}

/// Outstanding call as listed by `GET /api/calls`.
#[derive(Debug, Clone, Deserialize)]
struct CallDto {
    call_id: String,
    terminal_id: String,
    status: String,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    caller: Option<String>,
}

/// Upstream call status → `call` log code. Unknown statuses map to `0`,
/// which the classifier rejects as unmapped.
fn call_status_code(status: &str) -> i32 {
    match status.to_ascii_lowercase().as_str() {
        "active" | "ringing" | "connected" => 1,
        "busy" => 2,
        "ended" | "closed" => 3,
        _ => 0,
    }
}

impl From<CallDto> for RawLogRecord {
    fn from(dto: CallDto) -> Self {
        Self {
            log_type: "call".to_string(),
            status_code: call_status_code(&dto.status),
            device: DeviceKey::new(dto.terminal_id, DeviceType::EmergencyTerminal),
            occurred_at: dto.started_at,
            ended_at: dto.ended_at,
            position: None,
            correlation_token: Some(dto.call_id),
            payload: serde_json::json!({
                "caller": dto.caller,
                "status": dto.status,
            }),
        }
    }
}

/// HTTP pull half of the emergency-call source.
#[derive(Debug, Clone, Default)]
pub struct EmergencyCallAdapter {
    client: reqwest::Client,
}

impl EmergencyCallAdapter {
    /// Creates an adapter sharing an existing HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::unreachable(
                SOURCE_NAME,
                format!("GET {url} answered {status}"),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))
    }
}

#[async_trait]
impl SourceAdapter for EmergencyCallAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn service(&self) -> ServiceType {
        ServiceType::EmergencyCall
    }

    fn configured(&self, settings: &SourceSettings) -> bool {
        settings.emergency_call.base_url.is_some()
    }

    fn interval(&self, settings: &SourceSettings) -> Duration {
        settings.emergency_call.interval
    }

    async fn fetch(
        &self,
        _cursor: &PollCursor,
        settings: &SourceSettings,
    ) -> Result<SourceBatch, PipelineError> {
        let base = settings
            .emergency_call
            .base_url
            .as_deref()
            .ok_or_else(|| PipelineError::unreachable(SOURCE_NAME, "EMERGENCY_BASE_URL not set"))?
            .trim_end_matches('/');

        let terminals: Vec<TerminalDto> = self.get_json(&format!("{base}/api/devices")).await?;
        let calls: Vec<CallDto> = self.get_json(&format!("{base}/api/calls")).await?;

        Ok(SourceBatch {
            devices: terminals.into_iter().map(ObservedDevice::from).collect(),
            records: calls.into_iter().map(RawLogRecord::from).collect(),
        })
    }
}

/// Signal emitted by the emergency-call service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Service (re)connected; state may have changed while we were away.
    Connect,
    /// Service is going away.
    Disconnect,
    /// New or changed call data is available.
    DataChanged,
}

impl Signal {
    /// Parses a text frame, either a bare signal name or a JSON object
    /// carrying it under `"type"`, `"signal"`, or `"event"`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let name = if text.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(text).ok()?;
            ["type", "signal", "event"]
                .iter()
                .find_map(|field| value.get(*field).and_then(serde_json::Value::as_str))
                .map(str::to_string)?
        } else {
            text.to_string()
        };

        match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "connect" | "connected" => Some(Self::Connect),
            "disconnect" | "disconnected" => Some(Self::Disconnect),
            "data_changed" | "event_available" | "data_available" => Some(Self::DataChanged),
            _ => None,
        }
    }

    /// Whether this signal should wake the source.
    #[must_use]
    pub const fn wakes(self) -> bool {
        matches!(self, Self::Connect | Self::DataChanged)
    }
}

/// Background WebSocket connection turning service signals into triggers.
#[derive(Debug)]
pub struct SignalListener {
    settings: SettingsHandle,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl SignalListener {
    /// Creates a listener that wakes `trigger`.
    #[must_use]
    pub fn new(settings: SettingsHandle, trigger: Arc<Notify>, cancel: CancellationToken) -> Self {
        Self {
            settings,
            trigger,
            cancel,
        }
    }

    /// Spawns the reconnect loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut changes = self.settings.subscribe();
        loop {
            let settings = self.settings.current();
            let delay = settings.emergency_call.reconnect_delay;

            let url = match settings.emergency_call.signal_url.clone() {
                Some(url) => url,
                None => {
                    tracing::debug!("no emergency signal url configured, waiting for reload");
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        changed = changes.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracing::info!(version = changes.borrow().version, "emergency signal settings reloaded, reconnecting");
                    continue;
                }
                result = self.connect_and_read(&url) => match result {
                    Ok(()) => tracing::info!("emergency signal socket closed"),
                    Err(e) => tracing::warn!(error = %e, "emergency signal socket failed"),
                },
            }

            tracing::debug!(?delay, "waiting before signal reconnect");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("emergency signal loop exiting");
    }

    async fn connect_and_read(&self, url: &str) -> Result<(), PipelineError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))?;
        tracing::info!(url, "emergency signal socket connected");
        // a fresh connection may have missed signals
        self.trigger.notify_one();

        let (_write, mut read) = stream.split();
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => self.on_signal(text.as_str()),
                Ok(Message::Close(_)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(PipelineError::unreachable(SOURCE_NAME, e)),
            }
        }
        Ok(())
    }

    fn on_signal(&self, text: &str) {
        match Signal::parse(text) {
            Some(signal) if signal.wakes() => {
                tracing::debug!(?signal, "emergency signal received");
                self.trigger.notify_one();
            }
            Some(signal) => tracing::info!(?signal, "emergency service signalled"),
            None => tracing::debug!(frame = text, "ignoring unknown signal frame"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::test_settings;

    fn settings_with_base(base: &str) -> SourceSettings {
        let mut settings = test_settings();
        settings.emergency_call.base_url = Some(base.to_string());
        settings
    }

    #[test]
    fn parses_bare_and_json_signals() {
        assert_eq!(Signal::parse("data_changed"), Some(Signal::DataChanged));
        assert_eq!(Signal::parse("Event Available"), Some(Signal::DataChanged));
        assert_eq!(
            Signal::parse(r#"{"type":"connect"}"#),
            Some(Signal::Connect)
        );
        assert_eq!(
            Signal::parse(r#"{"signal":"disconnect"}"#),
            Some(Signal::Disconnect)
        );
        assert_eq!(Signal::parse("heartbeat"), None);
        assert_eq!(Signal::parse("{not json"), None);
        assert!(!Signal::Disconnect.wakes());
    }

    #[test]
    fn unknown_call_status_maps_to_unmapped_code() {
        assert_eq!(call_status_code("RINGING"), 1);
        assert_eq!(call_status_code("busy"), 2);
        assert_eq!(call_status_code("ended"), 3);
        assert_eq!(call_status_code("on_hold"), 0);
    }

    #[tokio::test]
    async fn pulls_devices_then_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "terminal_id": "T1", "name": "Lobby terminal", "ip": "10.2.0.1", "online": true },
                { "terminal_id": "T2", "name": "Garage terminal", "online": false }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/calls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "call_id": "c-9",
                    "terminal_id": "T1",
                    "status": "ended",
                    "started_at": "2026-03-02T09:00:00Z",
                    "ended_at": "2026-03-02T09:03:00Z",
                    "caller": "Guard"
                }
            ])))
            .mount(&server)
            .await;

        let adapter = EmergencyCallAdapter::default();
        let settings = settings_with_base(&format!("{}/", server.uri()));
        let Ok(batch) = adapter
            .fetch(&PollCursor::empty(SOURCE_NAME), &settings)
            .await
        else {
            panic!("pull failed");
        };

        assert_eq!(batch.devices.len(), 2);
        assert!(batch.devices.iter().any(|d| d.status.decode().linked));
        let Some(record) = batch.records.first() else {
            panic!("expected one call record");
        };
        assert_eq!(record.status_code, 3);
        assert_eq!(record.correlation_token.as_deref(), Some("c-9"));
        assert!(record.ended_at.is_some());
        assert_eq!(batch.last_position(), None);
    }

    #[tokio::test]
    async fn server_error_is_source_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = EmergencyCallAdapter::default();
        let result = adapter
            .fetch(
                &PollCursor::empty(SOURCE_NAME),
                &settings_with_base(&server.uri()),
            )
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnreachable { .. })
        ));
    }

    async fn await_trigger(trigger: &Notify) {
        let woke = tokio::time::timeout(Duration::from_secs(5), trigger.notified()).await;
        assert!(woke.is_ok(), "trigger was not woken");
    }

    #[tokio::test]
    async fn connect_and_data_changed_wake_the_trigger() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        let (go_tx, go_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                return;
            };
            let _ = go_rx.await;
            let _ = ws.send(Message::text("data_changed")).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut settings = test_settings();
        settings.emergency_call.signal_url = Some(format!("ws://{addr}"));
        let trigger = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let handle = SignalListener::new(
            SettingsHandle::new(settings),
            Arc::clone(&trigger),
            cancel.clone(),
        )
        .spawn();

        await_trigger(&trigger).await;
        let _ = go_tx.send(());
        await_trigger(&trigger).await;

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn reconnect_forces_another_wake_up() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };

        tokio::spawn(async move {
            // accept twice, closing the first connection right away
            for _ in 0..2 {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                    let _ = ws.close(None).await;
                }
            }
        });

        let mut settings = test_settings();
        settings.emergency_call.signal_url = Some(format!("ws://{addr}"));
        let trigger = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let handle = SignalListener::new(
            SettingsHandle::new(settings),
            Arc::clone(&trigger),
            cancel.clone(),
        )
        .spawn();

        await_trigger(&trigger).await;
        await_trigger(&trigger).await;

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_listener() {
        let cancel = CancellationToken::new();
        let handle = SignalListener::new(
            SettingsHandle::new(test_settings()),
            Arc::new(Notify::new()),
            cancel.clone(),
        )
        .spawn();
        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(joined.is_ok());
    }
}
