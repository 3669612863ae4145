//! Persistence layer: canonical device/event storage and poll cursors.
//!
//! [`FacilityStore`] is the seam between the pipeline and the relational
//! store. A run reads one [`StoreSnapshot`] up front and hands all its
//! writes to [`FacilityStore::commit`], which applies them in a single
//! transaction together with the cursor advance.
//!
//! Two implementations exist: [`PostgresStore`] for production and
//! [`MemoryStore`] with the same semantics for tests and for running
//! without a database.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use models::{
    CommitBatch, CommitOutcome, DeviceWrite, EventOutcome, SnapshotRequest, StoreSnapshot,
};
pub use postgres::PostgresStore;

use crate::domain::PollCursor;
use crate::error::PipelineError;

/// Conflict-aware store for devices, events, and cursors.
#[async_trait]
pub trait FacilityStore: Send + Sync + std::fmt::Debug {
    /// Loads the committed cursor of `source` (empty if never committed).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on storage failure.
    async fn load_cursor(&self, source: &str) -> Result<PollCursor, PipelineError>;

    /// Loads devices, configuration, and open correlations in bulk.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on storage failure.
    async fn load_snapshot(&self, request: &SnapshotRequest)
    -> Result<StoreSnapshot, PipelineError>;

    /// Applies every write of a run atomically: device upserts, event
    /// insert-or-merge, alarm status derivation, cursor advance.
    ///
    /// On error nothing is applied.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] if any write fails.
    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, PipelineError>;
}
