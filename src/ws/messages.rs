//! WebSocket message types: envelope and client commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

impl WsMessage {
    /// Builds a server-originated message with a fresh id.
    #[must_use]
    pub fn server(msg_type: WsMessageType, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Builds a reply to the client message `id`.
    #[must_use]
    pub fn reply(id: String, msg_type: WsMessageType, payload: serde_json::Value) -> Self {
        Self {
            id,
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Command sent by an observer.
    Command,
    /// Reply to an observer command.
    Response,
    /// Pipeline notification pushed to the observer.
    Event,
    /// Rejected observer message.
    Error,
}

/// Commands a client can send in the payload of a `command` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Receive the named notifications. `"*"` selects all of them.
    Subscribe {
        /// Notification names, e.g. `event-popup`.
        names: Vec<String>,
    },
    /// Stop receiving the named notifications.
    Unsubscribe {
        /// Notification names.
        names: Vec<String>,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_command() {
        let payload = serde_json::json!({ "command": "subscribe", "names": ["event-popup"] });
        let Ok(WsCommand::Subscribe { names }) = serde_json::from_value(payload) else {
            panic!("expected subscribe");
        };
        assert_eq!(names, vec!["event-popup".to_string()]);
    }

    #[test]
    fn envelope_uses_type_field() {
        let msg = WsMessage::server(WsMessageType::Event, serde_json::json!({}));
        let json = serde_json::to_value(&msg).unwrap_or_default();
        assert_eq!(json.get("type"), Some(&serde_json::json!("event")));
        assert!(!msg.id.is_empty());
    }
}
