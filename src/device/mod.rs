//! # Device Layer
//!
//! Everything the bridge knows about a physical thermostat lives here:
//!
//! ```text
//! device/
//! ├── identity.rs    - stable per-unit key used for topics and lookups
//! ├── thermostat.rs  - blocking device trait, status snapshot, errors
//! ├── lane.rs        - one serialized execution lane per device
//! └── registry.rs    - identity → handle map built at startup
//! ```
//!
//! The concrete transport (Broadlink UDP) lives in [`crate::broadlink`] and only
//! meets the rest of the bridge through the [`Thermostat`] trait.

pub mod identity;
pub mod lane;
pub mod registry;
pub mod thermostat;

pub use identity::DeviceIdentity;
pub use lane::DeviceHandle;
pub use registry::Registry;
pub use thermostat::{DeviceClock, DeviceError, StatusSnapshot, Thermostat};
