//! External source adapters.
//!
//! An adapter is pure extraction: it reads devices and log records from
//! one external system and hands them over as a [`SourceBatch`]. It never
//! classifies, never touches the canonical store, and never publishes.

pub mod access_control;
pub mod emergency_call;

use async_trait::async_trait;

pub use access_control::AccessControlAdapter;
pub use emergency_call::{EmergencyCallAdapter, SignalListener};

use crate::config::SourceSettings;
use crate::domain::{PollCursor, ServiceType, SourceBatch};
use crate::error::PipelineError;

/// Reader for one external source.
#[async_trait]
pub trait SourceAdapter: Send + Sync + std::fmt::Debug {
    /// Stable source name, also the cursor key.
    fn name(&self) -> &str;

    /// Service owning the devices and events of this source.
    fn service(&self) -> ServiceType;

    /// Whether `settings` carry enough to reach this source at all.
    fn configured(&self, settings: &SourceSettings) -> bool;

    /// Poll cadence under `settings`.
    fn interval(&self, settings: &SourceSettings) -> std::time::Duration;

    /// Extracts everything after `cursor`.
    ///
    /// Cursorless sources ignore `cursor` and return their full current
    /// state. Records come back in source order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnreachable`] when the source cannot
    /// be reached or answers with something unreadable.
    async fn fetch(
        &self,
        cursor: &PollCursor,
        settings: &SourceSettings,
    ) -> Result<SourceBatch, PipelineError>;
}
