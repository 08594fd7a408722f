use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Stable identity of a hub: its BLE hardware address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubIdentity(String);

impl HubIdentity {
    /// Create an identity from an address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HubIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HubIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A device seen during a BLE scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// BLE address of the device
    pub identity: HubIdentity,
    /// Advertised local name, if the device sent one
    pub advertised_name: Option<String>,
}

impl DiscoveredDevice {
    /// Create a discovered device record
    pub fn new(identity: impl Into<HubIdentity>, advertised_name: Option<String>) -> Self {
        Self {
            identity: identity.into(),
            advertised_name,
        }
    }
}

/// Connection lifecycle of a hub session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Never connected
    Unconnected,
    /// Connection attempt in progress
    Connecting,
    /// Live link to the hub
    Connected,
    /// Was connected, link is gone
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "Unconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Per-hub entry returned by a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    /// Hub address
    pub identity: HubIdentity,
    /// Display name
    pub name: String,
    /// Whether the hub currently has a live link
    pub connected: bool,
    /// Last commanded speed
    pub speed: i8,
}

/// Diagnostic snapshot of one hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubDiagnostics {
    /// Display name
    pub name: String,
    /// Last commanded speed
    pub speed: i8,
    /// Whether the hub currently has a live link
    pub connected: bool,
    /// Hub BLE address
    pub address: HubIdentity,
    /// Last command frame in lowercase hex, `None` if nothing was sent yet
    pub last_command_hex: Option<String>,
    /// Battery level, `None` while the hub never answered a battery request
    pub battery_percent: Option<u8>,
    /// Last battery notification frame in lowercase hex
    pub last_notification_hex: Option<String>,
}

impl HubDiagnostics {
    /// Battery level for display: `"NN%"` or `"no response"`
    #[must_use]
    pub fn battery_label(&self) -> String {
        self.battery_percent
            .map_or_else(|| "no response".to_string(), |pct| format!("{pct}%"))
    }
}

/// Tunables for scanning, connecting and the execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Motor port commands are sent to (0 = port A, 1 = port B)
    pub motor_port: u8,
    /// How long a BLE scan runs, in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection attempt timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long a synchronous caller waits for the execution context
    pub bridge_timeout_ms: u64,
    /// Wait after a battery request before reading the result
    pub battery_settle_ms: u64,
    /// Prefix for sequential default names (`"Hub"` gives `"Hub 1"`)
    pub name_prefix: String,
    /// Name new hubs after their advertised name instead of sequentially
    pub use_advertised_names: bool,
}

impl HubConfig {
    /// Scan duration
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Caller-side wait on the execution context
    #[must_use]
    pub const fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    /// Battery settle interval
    #[must_use]
    pub const fn battery_settle(&self) -> Duration {
        Duration::from_millis(self.battery_settle_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            motor_port: 0x00,
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 4_000,
            bridge_timeout_ms: 10_000,
            battery_settle_ms: 500,
            name_prefix: "Hub".to_string(),
            use_advertised_names: false,
        }
    }
}
