//! WebSocket layer: observer connections, message envelope, subscriptions.
//!
//! The endpoint at `/ws` streams pipeline notifications. Clients receive
//! every notification until they subscribe to a subset of names.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
