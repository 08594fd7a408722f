#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # poweredup
//!
//! Drive LEGO Powered Up motor hubs (City trains, Move hubs and friends) over
//! Bluetooth Low Energy from ordinary synchronous code.
//!
//! The crate is the control core behind a web or script front end:
//!
//! - **Protocol codec**: motor speed and battery request frames, battery
//!   notification decoding ([`protocol`])
//! - **Hub sessions**: one per physical hub, owning its BLE link and its
//!   last-known speed, command and battery level ([`session`])
//! - **Registry**: hubs keyed by BLE address with stable, sequential names
//!   that survive disconnects and rescans ([`registry`])
//! - **Discovery**: timed scans filtered by advertised name, reconciled into
//!   the registry ([`discovery`])
//! - **Execution context**: one background thread owns every hub and all BLE
//!   I/O; callers submit operations and block for the result ([`bridge`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use poweredup::{HubConfig, HubControl};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hubs = HubControl::start(HubConfig::default())?;
//!
//!     let connected = hubs.connect()?;
//!     println!("{connected} hub(s) connected");
//!
//!     hubs.set_speed_all(50)?;
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     hubs.stop_all()?;
//!
//!     for hub in hubs.status()? {
//!         println!("{}: speed {} connected {}", hub.name, hub.speed, hub.connected);
//!     }
//!     Ok(())
//! }
//! ```

use uuid::Uuid;

/// Bluetooth Low Energy transport boundary
pub mod ble;
/// Background execution context and synchronous control facade
pub mod bridge;
/// Async control operations run inside the execution context
pub mod controller;
/// Scanning and reconciliation into the registry
pub mod discovery;
/// Error types and handling
pub mod error;
/// Wire frames
pub mod protocol;
/// Hub registry keyed by BLE address
pub mod registry;
/// Per-hub connection state
pub mod session;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use ble::{BleTransport, HubLink, Transport};
pub use bridge::{ExecutionContext, HubControl, PendingCall};
pub use controller::HubController;
pub use error::{HubError, Result};
pub use registry::HubRegistry;
pub use session::HubSession;
pub use types::{
    DiscoveredDevice, HubConfig, HubDiagnostics, HubIdentity, HubStatus, SessionState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// LEGO Wireless Protocol 3 hub service UUID
pub const HUB_SERVICE_UUID_STR: &str = "00001623-1212-efde-1623-785feabcd123";

/// LEGO Wireless Protocol 3 characteristic UUID
///
/// Commands are written to and notifications arrive on this one characteristic.
pub const HUB_CHARACTERISTIC_UUID_STR: &str = "00001624-1212-efde-1623-785feabcd123";

/// Parsed form of [`HUB_SERVICE_UUID_STR`]
pub const HUB_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1623_1212_efde_1623_785f_eabc_d123);

/// Parsed form of [`HUB_CHARACTERISTIC_UUID_STR`]
pub const HUB_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1624_1212_efde_1623_785f_eabc_d123);
