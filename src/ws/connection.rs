//! WebSocket connection loop.
//!
//! Forwards filtered notifications to one observer and answers its
//! subscription commands. Observers that fall behind the broadcast buffer
//! lose the oldest notifications; there is no replay.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::Notification;

/// Runs the read/write loop for a single WebSocket connection.
pub async fn run_connection(socket: WebSocket, mut notifications: broadcast::Receiver<Notification>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_text_message(&text, &mut subs);
                        if let Some(resp_json) = response
                            && ws_tx.send(Message::text(resp_json)).await.is_err() {
                                break;
                            }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        if !subs.matches(&notification) {
                            continue;
                        }
                        let payload = serde_json::to_value(&notification).unwrap_or_default();
                        let msg = WsMessage::server(WsMessageType::Event, payload);
                        let json = serde_json::to_string(&msg).unwrap_or_default();
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws observer lagged behind notifier");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

/// Handles a text message from the client, returning an optional JSON
/// response.
fn handle_text_message(text: &str, subs: &mut SubscriptionManager) -> Option<String> {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return error_reply(String::new(), 400, "malformed JSON");
    };

    let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
        return error_reply(msg.id, 404, "unknown command");
    };

    let payload = match command {
        WsCommand::Subscribe { names } => {
            let unknown = subs.subscribe(&names);
            serde_json::json!({
                "subscribed": subs.selected(),
                "unknown": unknown,
                "wildcard": subs.is_subscribed_all(),
            })
        }
        WsCommand::Unsubscribe { names } => {
            subs.unsubscribe(&names);
            serde_json::json!({
                "subscribed": subs.selected(),
                "wildcard": subs.is_subscribed_all(),
            })
        }
    };
    serde_json::to_string(&WsMessage::reply(msg.id, WsMessageType::Response, payload)).ok()
}

fn error_reply(id: String, code: u16, message: &str) -> Option<String> {
    let err = WsMessage::reply(
        id,
        WsMessageType::Error,
        serde_json::json!({ "code": code, "message": message }),
    );
    serde_json::to_string(&err).ok()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn reply(text: &str, subs: &mut SubscriptionManager) -> WsMessage {
        let Some(json) = handle_text_message(text, subs) else {
            panic!("expected a reply");
        };
        let Ok(msg) = serde_json::from_str::<WsMessage>(&json) else {
            panic!("reply is not an envelope");
        };
        msg
    }

    #[test]
    fn subscribe_replies_with_selection() {
        let mut subs = SubscriptionManager::new();
        let text = r#"{"id":"c1","type":"command","timestamp":"2026-03-02T09:00:00Z",
            "payload":{"command":"subscribe","names":["event-popup","workflow-dispatch"]}}"#;
        let msg = reply(text, &mut subs);
        assert_eq!(msg.id, "c1");
        assert_eq!(msg.msg_type, WsMessageType::Response);
        assert_eq!(
            msg.payload.get("subscribed"),
            Some(&serde_json::json!(["event-popup", "workflow-dispatch"]))
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut subs = SubscriptionManager::new();
        let msg = reply("not json", &mut subs);
        assert_eq!(msg.msg_type, WsMessageType::Error);
        assert_eq!(msg.payload.get("code"), Some(&serde_json::json!(400)));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut subs = SubscriptionManager::new();
        let text = r#"{"id":"c2","type":"command","timestamp":"2026-03-02T09:00:00Z",
            "payload":{"command":"reboot"}}"#;
        let msg = reply(text, &mut subs);
        assert_eq!(msg.msg_type, WsMessageType::Error);
        assert_eq!(msg.id, "c2");
    }
}
