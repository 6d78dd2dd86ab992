//! # Broadlink Transport
//!
//! Blocking UDP implementation of the [`Thermostat`](crate::device::Thermostat)
//! trait for Hysen heating controllers.
//!
//! ```text
//! broadlink/
//! ├── protocol.rs   - packet codec, AES session, request/response exchange
//! ├── discovery.rs  - broadcast hello and answer parsing
//! └── hysen.rs      - Hysen register framing, status decoding, device impl
//! ```
//!
//! Everything here blocks on socket reads; callers run it on the blocking pool.

pub mod discovery;
pub mod hysen;
pub mod protocol;

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::Thermostat;

pub use discovery::DiscoveredDevice;
pub use hysen::HysenThermostat;
pub use protocol::ProtocolError;

/// Discovers the LAN and opens a session to every Hysen controller that answered.
///
/// Other Broadlink products are skipped. Authentication is left to the registry.
pub fn discover_thermostats(
    timeout: Duration,
    local_ip: Option<Ipv4Addr>,
    device_timeout: Duration,
) -> Result<Vec<Box<dyn Thermostat>>, ProtocolError> {
    let mut thermostats: Vec<Box<dyn Thermostat>> = Vec::new();

    for device in discovery::discover(timeout, local_ip)? {
        if !HysenThermostat::is_hysen(&device) {
            debug!("Skipping device type {:#06x} at {}", device.devtype, device.host);
            continue;
        }
        match HysenThermostat::connect(&device, device_timeout) {
            Ok(thermostat) => thermostats.push(Box::new(thermostat)),
            Err(e) => warn!("Cannot open session to {}: {}", device.host, e),
        }
    }

    info!("Found {} Hysen devices", thermostats.len());
    Ok(thermostats)
}
