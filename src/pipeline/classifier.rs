//! Log classifier: maps `(log_type, status_code)` to exactly one bucket.
//!
//! The table is fixed and total over [`KNOWN_CODES`]. Anything outside it
//! is reported as [`Unmapped`] and dropped by the caller; there is no
//! default bucket.

use std::fmt;

use serde::Serialize;

use crate::domain::RawLogRecord;

/// Direction or mode of an anti-passback violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiPassback {
    /// Entry without a matching exit.
    Entry,
    /// Exit without a matching entry.
    Exit,
    /// Re-entry inside the lockout period.
    Timed,
}

/// Phase of a door held open too long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorOpenPhase {
    /// Door exceeded its open time.
    Start,
    /// Door closed again.
    End,
}

/// Phase of an emergency call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Call is ringing or connected.
    Active,
    /// Operator line busy.
    Busy,
    /// Call finished.
    Ended,
}

/// Classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "bucket", content = "phase", rename_all = "snake_case")]
pub enum Bucket {
    /// Valid credential, door released.
    AccessGranted,
    /// Card not registered.
    AccessDeniedUnregistered,
    /// Card not authorized for this reader.
    UnauthorizedReader,
    /// Card used outside its allowed hours.
    RestrictedHours,
    /// Reader used outside its allowed hours.
    RestrictedHoursReader,
    /// Too many re-authentication attempts.
    ReAuthExceeded,
    /// Door opened without a release.
    ForcedOpen,
    /// Anti-passback violation.
    AntiPassback(AntiPassback),
    /// Door held open too long.
    DoorOpenTooLong(DoorOpenPhase),
    /// Panel or system alarm.
    SystemAlarm,
    /// Fire alarm input.
    FireAlarm,
    /// Emergency call from a terminal.
    EmergencyCall(CallPhase),
}

impl Bucket {
    /// Event-type id used to look up the live configuration.
    #[must_use]
    pub const fn event_type_id(self) -> i32 {
        match self {
            Self::AccessGranted => 20,
            Self::AccessDeniedUnregistered => 21,
            Self::UnauthorizedReader => 22,
            Self::RestrictedHours => 23,
            Self::RestrictedHoursReader => 24,
            Self::ForcedOpen => 25,
            Self::ReAuthExceeded => 26,
            Self::AntiPassback(AntiPassback::Entry) => 27,
            Self::AntiPassback(AntiPassback::Exit) => 28,
            Self::AntiPassback(AntiPassback::Timed) => 29,
            Self::DoorOpenTooLong(_) => 30,
            Self::SystemAlarm => 31,
            Self::FireAlarm => 32,
            Self::EmergencyCall(_) => 40,
        }
    }

    /// Short description used when building event text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AccessGranted => "Access granted",
            Self::AccessDeniedUnregistered => "Access denied: unregistered card",
            Self::UnauthorizedReader => "Access denied: unauthorized reader",
            Self::RestrictedHours => "Access denied: restricted hours",
            Self::RestrictedHoursReader => "Access denied: reader restricted hours",
            Self::ReAuthExceeded => "Re-authentication limit exceeded",
            Self::ForcedOpen => "Door forced open",
            Self::AntiPassback(AntiPassback::Entry) => "Anti-passback violation (entry)",
            Self::AntiPassback(AntiPassback::Exit) => "Anti-passback violation (exit)",
            Self::AntiPassback(AntiPassback::Timed) => "Anti-passback violation (timed)",
            Self::DoorOpenTooLong(DoorOpenPhase::Start) => "Door open too long",
            Self::DoorOpenTooLong(DoorOpenPhase::End) => "Door open too long (closed)",
            Self::SystemAlarm => "System alarm",
            Self::FireAlarm => "Fire alarm",
            Self::EmergencyCall(CallPhase::Active) => "Emergency call active",
            Self::EmergencyCall(CallPhase::Busy) => "Emergency call busy",
            Self::EmergencyCall(CallPhase::Ended) => "Emergency call ended",
        }
    }

    /// Whether this bucket closes an occurrence opened by an earlier record.
    #[must_use]
    pub const fn is_end(self) -> bool {
        matches!(
            self,
            Self::DoorOpenTooLong(DoorOpenPhase::End) | Self::EmergencyCall(CallPhase::Ended)
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Every `(log_type, status_code)` pair the adapters can produce.
pub const KNOWN_CODES: [(&str, i32); 17] = [
    ("access", 1),
    ("access", 2),
    ("access", 3),
    ("access", 4),
    ("access", 5),
    ("access", 6),
    ("access", 7),
    ("access", 8),
    ("access", 9),
    ("door", 1),
    ("door", 2),
    ("door", 3),
    ("alarm", 1),
    ("alarm", 2),
    ("call", 1),
    ("call", 2),
    ("call", 3),
];

/// A record whose code is not in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmapped {
    /// Log type of the rejected record.
    pub log_type: String,
    /// Status code of the rejected record.
    pub status_code: i32,
}

impl fmt::Display for Unmapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unmapped code {}:{}", self.log_type, self.status_code)
    }
}

/// Classifies a raw `(log_type, status_code)` pair.
///
/// # Errors
///
/// Returns [`Unmapped`] for any pair outside [`KNOWN_CODES`].
pub fn classify_code(log_type: &str, status_code: i32) -> Result<Bucket, Unmapped> {
    let bucket = match (log_type, status_code) {
        ("access", 1) => Bucket::AccessGranted,
        ("access", 2) => Bucket::AccessDeniedUnregistered,
        ("access", 3) => Bucket::UnauthorizedReader,
        ("access", 4) => Bucket::RestrictedHours,
        ("access", 5) => Bucket::RestrictedHoursReader,
        ("access", 6) => Bucket::ReAuthExceeded,
        ("access", 7) => Bucket::AntiPassback(AntiPassback::Entry),
        ("access", 8) => Bucket::AntiPassback(AntiPassback::Exit),
        ("access", 9) => Bucket::AntiPassback(AntiPassback::Timed),
        ("door", 1) => Bucket::ForcedOpen,
        ("door", 2) => Bucket::DoorOpenTooLong(DoorOpenPhase::Start),
        ("door", 3) => Bucket::DoorOpenTooLong(DoorOpenPhase::End),
        ("alarm", 1) => Bucket::SystemAlarm,
        ("alarm", 2) => Bucket::FireAlarm,
        ("call", 1) => Bucket::EmergencyCall(CallPhase::Active),
        ("call", 2) => Bucket::EmergencyCall(CallPhase::Busy),
        ("call", 3) => Bucket::EmergencyCall(CallPhase::Ended),
        _ => {
            return Err(Unmapped {
                log_type: log_type.to_string(),
                status_code,
            });
        }
    };
    Ok(bucket)
}

/// Classifies a raw record.
///
/// # Errors
///
/// Returns [`Unmapped`] when the record's code is not in the table.
pub fn classify(record: &RawLogRecord) -> Result<Bucket, Unmapped> {
    classify_code(&record.log_type, record.status_code)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_known_code_maps_to_a_bucket() {
        for (log_type, code) in KNOWN_CODES {
            assert!(
                classify_code(log_type, code).is_ok(),
                "{log_type}:{code} should be mapped"
            );
        }
    }

    #[test]
    fn known_codes_map_to_distinct_buckets() {
        let buckets: HashSet<Bucket> = KNOWN_CODES
            .iter()
            .filter_map(|(t, c)| classify_code(t, *c).ok())
            .collect();
        assert_eq!(buckets.len(), KNOWN_CODES.len());
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for (log_type, code) in [("access", 0), ("access", 10), ("door", 4), ("hvac", 1), ("", 1)]
        {
            let Err(unmapped) = classify_code(log_type, code) else {
                panic!("{log_type}:{code} must not be mapped");
            };
            assert_eq!(unmapped.status_code, code);
        }
    }

    #[test]
    fn forced_open_is_event_type_25() {
        assert_eq!(classify_code("door", 1).map(Bucket::event_type_id), Ok(25));
    }

    #[test]
    fn anti_passback_variants_have_distinct_ids() {
        let ids: HashSet<i32> = [7, 8, 9]
            .iter()
            .filter_map(|c| classify_code("access", *c).ok())
            .map(Bucket::event_type_id)
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn paired_phases_share_event_type() {
        assert_eq!(
            Bucket::DoorOpenTooLong(DoorOpenPhase::Start).event_type_id(),
            Bucket::DoorOpenTooLong(DoorOpenPhase::End).event_type_id()
        );
        assert!(Bucket::EmergencyCall(CallPhase::Ended).is_end());
        assert!(!Bucket::EmergencyCall(CallPhase::Busy).is_end());
    }
}
