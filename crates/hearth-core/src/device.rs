//! Device types shared by the scanners, controllers and the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier for a device: a network address, a hardware address, or a
/// key synthesized from the device type and address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Use an address (IP, `host:port`, or Bluetooth MAC) verbatim as the id
    pub fn from_address(address: &str) -> Self {
        Self(address.to_string())
    }

    /// Deterministic registry id for a device of `device_type` at `address`
    pub fn synthesize(device_type: DeviceType, address: &str) -> Self {
        Self(format!("{}-{}", device_type.as_str(), address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of controllable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Bluetooth,
    AndroidTv,
    Chromecast,
    Projector,
    SmartHome,
    Mobile,
}

impl DeviceType {
    pub const ALL: [DeviceType; 6] = [
        DeviceType::Bluetooth,
        DeviceType::AndroidTv,
        DeviceType::Chromecast,
        DeviceType::Projector,
        DeviceType::SmartHome,
        DeviceType::Mobile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bluetooth => "bluetooth",
            Self::AndroidTv => "android-tv",
            Self::Chromecast => "chromecast",
            Self::Projector => "projector",
            Self::SmartHome => "smart-home",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid device type: {0}")]
pub struct ParseDeviceTypeError(pub String);

impl FromStr for DeviceType {
    type Err = ParseDeviceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseDeviceTypeError(s.to_string()))
    }
}

/// Snapshot of a discovered device.
///
/// Produced fresh on every scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// IP address or hardware address
    pub address: String,
    pub port: Option<u16>,
    pub connected: bool,
    pub paired: bool,
    /// RSSI or link quality, when the platform reports one
    pub signal: Option<i32>,
    /// Free-form metadata such as model and manufacturer
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DeviceDescriptor {
    /// Create a descriptor keyed by its address, not connected and not paired
    pub fn new(name: impl Into<String>, device_type: DeviceType, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: DeviceId::from_address(&address),
            name: name.into(),
            device_type,
            address,
            port: None,
            connected: false,
            paired: false,
            signal: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: DeviceId) -> Self {
        self.id = id;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn with_paired(mut self, paired: bool) -> Self {
        self.paired = paired;
        self
    }

    pub fn with_signal(mut self, signal: Option<i32>) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Action families a connected device supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Power,
    Volume,
    Navigation,
    Media,
    LaunchApp,
    OpenUrl,
    Text,
    Cast,
    Input,
    Connect,
    Disconnect,
}

impl Capability {
    /// Capability set granted to a freshly connected device of this type
    pub fn for_type(device_type: DeviceType) -> BTreeSet<Capability> {
        use Capability::*;
        let caps: &[Capability] = match device_type {
            DeviceType::AndroidTv => &[Power, Volume, Navigation, Media, LaunchApp, OpenUrl, Text],
            DeviceType::Chromecast => &[Volume, Media, Cast],
            DeviceType::Projector => &[Power, Input],
            DeviceType::Bluetooth => &[Connect, Disconnect],
            DeviceType::SmartHome => &[Power],
            DeviceType::Mobile => &[Cast],
        };
        caps.iter().copied().collect()
    }

    /// Capability an action name belongs to
    pub fn for_action(action: &str) -> Option<Capability> {
        use Capability::*;
        let capability = match action {
            "power" | "power-on" | "power-off" => Power,
            "volume-up" | "volume-down" | "mute" | "set-volume" => Volume,
            "up" | "down" | "left" | "right" | "select" | "back" | "home" | "menu" => Navigation,
            "play" | "pause" | "play-pause" | "stop" | "next" | "previous" | "rewind"
            | "fast-forward" => Media,
            "launch-app" => LaunchApp,
            "open-url" => OpenUrl,
            "text" => Text,
            "cast" => Cast,
            "input" => Input,
            "connect" => Connect,
            "disconnect" => Disconnect,
            _ => return None,
        };
        Some(capability)
    }
}

/// Connection state of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

/// Entry in the orchestrator's live registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevice {
    pub id: DeviceId,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub address: String,
    pub status: ConnectionStatus,
    pub capabilities: BTreeSet<Capability>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectedDevice {
    /// Record a device connected now, with the default capabilities for its type
    pub fn new(id: DeviceId, device_type: DeviceType, address: impl Into<String>) -> Self {
        Self {
            id,
            device_type,
            address: address.into(),
            status: ConnectionStatus::Connected,
            capabilities: Capability::for_type(device_type),
            connected_at: Utc::now(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
