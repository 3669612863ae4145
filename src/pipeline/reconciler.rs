//! Device reconciler: turns adapter-reported device metadata into the
//! minimal set of device writes.
//!
//! A write is planned only when the stored row is missing or one of the
//! adapter-owned fields (name, IP, link, lock) differs. Curated fields
//! never appear in a [`DeviceWrite`]. Alarm status is derived by the store
//! inside the commit transaction, with the same is-distinct-from rule.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{Device, DeviceKey, ObservedDevice};
use crate::persistence::DeviceWrite;

/// Device writes of one run plus what they change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Upserts to apply.
    pub writes: Vec<DeviceWrite>,
    /// Devices created or renamed/re-addressed.
    pub identity_changes: usize,
    /// Existing devices whose link or lock status flipped.
    pub status_transitions: usize,
}

/// Plans the writes needed to bring `stored` in line with `observed`.
///
/// When a source reports the same device twice, the last report wins.
#[must_use]
pub fn plan(stored: &HashMap<DeviceKey, Device>, observed: &[ObservedDevice]) -> ReconcilePlan {
    let latest: BTreeMap<&DeviceKey, &ObservedDevice> =
        observed.iter().map(|o| (&o.key, o)).collect();

    let mut plan = ReconcilePlan::default();
    for (key, obs) in latest {
        let status = obs.status.decode();
        let write = DeviceWrite {
            key: key.clone(),
            name: obs.name.clone(),
            ip: obs.ip.clone(),
            service: obs.service,
            linked_status: status.linked,
            is_lock: status.locked,
        };

        match stored.get(key) {
            None => {
                tracing::debug!(device = %key, "new device sighted");
                plan.identity_changes += 1;
                plan.writes.push(write);
            }
            Some(current) => {
                let identity = current.name != write.name || current.ip != write.ip;
                let status_flip = current.linked_status != write.linked_status
                    || current.is_lock != write.is_lock;
                if identity {
                    plan.identity_changes += 1;
                }
                if status_flip {
                    tracing::debug!(
                        device = %key,
                        linked = write.linked_status,
                        locked = ?write.is_lock,
                        "device status transition"
                    );
                    plan.status_transitions += 1;
                }
                if identity || status_flip {
                    plan.writes.push(write);
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelStatus, DeviceType, ServiceType};

    fn observed(id: &str, name: &str, link_word: u32) -> ObservedDevice {
        ObservedDevice {
            key: DeviceKey::new(id, DeviceType::Door),
            name: name.to_string(),
            ip: Some("10.0.0.2".to_string()),
            service: ServiceType::AccessControl,
            status: ChannelStatus {
                channel: 0,
                link_word,
                lock_word: Some(0),
            },
        }
    }

    fn stored_from(obs: &ObservedDevice) -> HashMap<DeviceKey, Device> {
        let mut device = Device::discovered(obs);
        device.camera_id = Some("CAM-9".to_string());
        HashMap::from([(obs.key.clone(), device)])
    }

    #[test]
    fn new_devices_are_written() {
        let p = plan(&HashMap::new(), &[observed("D1", "Door 1", 1)]);
        assert_eq!(p.writes.len(), 1);
        assert_eq!(p.identity_changes, 1);
        assert_eq!(p.status_transitions, 0);
    }

    #[test]
    fn identical_state_plans_nothing() {
        let obs = observed("D1", "Door 1", 1);
        let p = plan(&stored_from(&obs), std::slice::from_ref(&obs));
        assert_eq!(p, ReconcilePlan::default());
    }

    #[test]
    fn link_flip_is_a_status_transition() {
        let obs = observed("D1", "Door 1", 1);
        let stored = stored_from(&obs);
        let p = plan(&stored, &[observed("D1", "Door 1", 0)]);
        assert_eq!(p.status_transitions, 1);
        assert_eq!(p.identity_changes, 0);
        assert_eq!(p.writes.first().map(|w| w.linked_status), Some(false));
    }

    #[test]
    fn rename_is_an_identity_change() {
        let obs = observed("D1", "Door 1", 1);
        let p = plan(&stored_from(&obs), &[observed("D1", "Front door", 1)]);
        assert_eq!(p.identity_changes, 1);
        assert_eq!(p.status_transitions, 0);
        assert_eq!(p.writes.len(), 1);
    }

    #[test]
    fn duplicate_reports_collapse_to_last() {
        let p = plan(
            &HashMap::new(),
            &[observed("D1", "first", 1), observed("D1", "second", 1)],
        );
        assert_eq!(p.writes.len(), 1);
        assert_eq!(p.writes.first().map(|w| w.name.as_str()), Some("second"));
    }
}
