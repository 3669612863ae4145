//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::SettingsHandle;
use crate::domain::Notifier;
use crate::scheduler::PollScheduler;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Scheduler owning every registered source.
    pub scheduler: Arc<PollScheduler>,
    /// Notification channel observed by WebSocket clients.
    pub notifier: Notifier,
    /// Versioned source settings.
    pub settings: SettingsHandle,
}
