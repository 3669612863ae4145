//! # facility-gateway
//!
//! Event ingestion and notification pipeline for a facility-monitoring
//! platform.
//!
//! The gateway pulls raw state from heterogeneous subsystems (a legacy
//! access-control database, an emergency-call service), reconciles it
//! against one canonical device and event store without duplication,
//! classifies it into typed facility events, and tells connected
//! operators about every committed change exactly once.
//!
//! ## Architecture
//!
//! ```text
//! PollScheduler (scheduler)          SignalListener (sources/)
//!     │  tick / trigger / reload ◄────────┘ connect, data changed
//!     │
//!     ├── SourceAdapter (sources/)        MySQL legacy DB, HTTP pulls
//!     │
//!     ├── Pipeline (pipeline/)
//!     │     classify → reconcile devices → materialize events
//!     │
//!     ├── FacilityStore (persistence/)    one transaction per run
//!     │
//!     └── EscalationRouter (pipeline/)
//!           ├── Notifier (domain/) ──► WS observers (ws/)
//!           └── SmsGateway (escalation/)
//!
//! REST (api/): health, source status, manual trigger, settings reload
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod persistence;
pub mod pipeline;
pub mod scheduler;
pub mod sources;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;
