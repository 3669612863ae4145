//! Canonical device model and adapter-observed device metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ServiceType;

/// Physical kind of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Door with an actuated lock.
    Door,
    /// Card reader attached to a door.
    Reader,
    /// Access-control panel driving doors and readers.
    Controller,
    /// Emergency-call terminal.
    EmergencyTerminal,
    /// Environmental or fire sensor.
    Sensor,
}

impl DeviceType {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Door => "door",
            Self::Reader => "reader",
            Self::Controller => "controller",
            Self::EmergencyTerminal => "emergency_terminal",
            Self::Sensor => "sensor",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "door" => Ok(Self::Door),
            "reader" => Ok(Self::Reader),
            "controller" => Ok(Self::Controller),
            "emergency_terminal" => Ok(Self::EmergencyTerminal),
            "sensor" => Ok(Self::Sensor),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// Identity of a device: source-assigned id plus device type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    /// Identifier assigned by the external source.
    pub device_id: String,
    /// Kind of device the id refers to.
    pub device_type: DeviceType,
}

impl DeviceKey {
    /// Creates a key from its parts.
    pub fn new(device_id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_type, self.device_id)
    }
}

/// Operator-curated position of a device on a facility map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    /// Building identifier.
    pub building: String,
    /// Floor identifier.
    pub floor: String,
    /// Horizontal map coordinate.
    pub x: f64,
    /// Vertical map coordinate.
    pub y: f64,
}

/// Canonical device row.
///
/// `map`, `outside_area`, `inside_area` and `camera_id` are curated by
/// operators and never written from adapter data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device identity.
    pub key: DeviceKey,
    /// Display name.
    pub name: String,
    /// Network address, when known.
    pub ip: Option<String>,
    /// Service the device belongs to.
    pub service: ServiceType,
    /// Map registration; events require it.
    pub map: Option<MapPosition>,
    /// Area on the outer side of the device (e.g. a corridor).
    pub outside_area: Option<String>,
    /// Area on the inner side of the device (e.g. a server room).
    pub inside_area: Option<String>,
    /// Communication with the device is alive.
    pub linked_status: bool,
    /// Lock state for actuated devices.
    pub is_lock: Option<bool>,
    /// Derived: an unacknowledged recent event references this device.
    pub alarm_status: bool,
    /// Bound camera, if any.
    pub camera_id: Option<String>,
}

impl Device {
    /// Builds a freshly sighted device with no curated fields.
    #[must_use]
    pub fn discovered(observed: &ObservedDevice) -> Self {
        let status = observed.status.decode();
        Self {
            key: observed.key.clone(),
            name: observed.name.clone(),
            ip: observed.ip.clone(),
            service: observed.service,
            map: None,
            outside_area: None,
            inside_area: None,
            linked_status: status.linked,
            is_lock: status.locked,
            alarm_status: false,
            camera_id: None,
        }
    }

    /// Human-readable location: outside and inside area names joined,
    /// falling back to the device name.
    #[must_use]
    pub fn location_label(&self) -> String {
        match (self.outside_area.as_deref(), self.inside_area.as_deref()) {
            (Some(outside), Some(inside)) => format!("{outside} / {inside}"),
            (Some(area), None) | (None, Some(area)) => area.to_string(),
            (None, None) => self.name.clone(),
        }
    }
}

/// Raw per-channel status words reported by a source.
///
/// Each physical channel owns one nibble of each word; a non-zero nibble
/// means the flag is set for that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Channel index on the controller (nibble position).
    pub channel: u8,
    /// Communication status word.
    pub link_word: u32,
    /// Lock status word, for actuated devices only.
    pub lock_word: Option<u32>,
}

/// Decoded boolean status of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedStatus {
    /// Communication alive.
    pub linked: bool,
    /// Lock engaged, for actuated devices.
    pub locked: Option<bool>,
}

impl ChannelStatus {
    /// Status for sources that already report plain booleans.
    #[must_use]
    pub fn from_flags(linked: bool, locked: Option<bool>) -> Self {
        Self {
            channel: 0,
            link_word: u32::from(linked),
            lock_word: locked.map(u32::from),
        }
    }

    /// Decodes this channel's nibble of each status word.
    #[must_use]
    pub fn decode(&self) -> DecodedStatus {
        DecodedStatus {
            linked: nibble_set(self.link_word, self.channel),
            locked: self.lock_word.map(|word| nibble_set(word, self.channel)),
        }
    }
}

fn nibble_set(word: u32, channel: u8) -> bool {
    let shift = u32::from(channel).saturating_mul(4);
    word.checked_shr(shift).is_some_and(|w| w & 0xF != 0)
}

/// Device metadata as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedDevice {
    /// Device identity.
    pub key: DeviceKey,
    /// Name reported by the source.
    pub name: String,
    /// Address reported by the source.
    pub ip: Option<String>,
    /// Service the source belongs to.
    pub service: ServiceType,
    /// Raw status words.
    pub status: ChannelStatus,
}
