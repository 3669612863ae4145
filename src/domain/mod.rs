//! Domain layer: canonical devices, events, raw records, cursors, and the
//! notification channel.
//!
//! Everything here is plain data plus small invariants (cursor
//! monotonicity, status nibble decoding, location labels). Behaviour that
//! needs storage or the network lives in `pipeline`, `sources`, and
//! `persistence`.

pub mod cursor;
pub mod device;
pub mod event;
pub mod notification;
pub mod notifier;
pub mod record;

pub use cursor::{CursorPosition, PollCursor};
pub use device::{
    ChannelStatus, DecodedStatus, Device, DeviceKey, DeviceType, MapPosition, ObservedDevice,
};
pub use event::{Event, EventId, EventTypeConfig, NewEvent, ServiceType};
pub use notification::{EventPopup, Notification, WorkflowDispatch};
pub use notifier::Notifier;
pub use record::{RawLogRecord, SourceBatch};
