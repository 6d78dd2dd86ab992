//! # MQTT Integration Module
//!
//! Bridges registered thermostats to a home automation hub over MQTT. Every
//! device gets its own broker session, so every device can carry its own last
//! will.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── client.rs        - broker seam (`Broker`) and the shared `HubPublisher`
//! ├── config.rs        - broker settings and per-device client options
//! ├── topics.rs        - topic family of a device and command topic parsing
//! ├── discovery.rs     - retained discovery payload
//! ├── state.rs         - state payload built from a fresh device snapshot
//! ├── availability.rs  - online announcements and the offline will
//! ├── command.rs       - command parsing, validation and dispatch
//! └── mqtt_handler.rs  - event pump and connection supervisor
//! ```
//!
//! ## Session Lifecycle
//!
//! The event pump turns `rumqttc` notifications into [`SessionEvent`]s. On every
//! `Connected` the supervisor runs the ready sequence (subscribe, config,
//! availability, state) before reporting [`ConnectionState::Ready`]; inbound
//! publishes go straight to the [`CommandDispatcher`].
//!
//! ## Wire Contract
//!
//! | Suffix              | Direction | Retained | QoS          |
//! |---------------------|-----------|----------|--------------|
//! | `config`            | out       | yes      | 0            |
//! | `state`             | out       | no       | 1            |
//! | `available`         | out       | yes      | 1 (will: 0)  |
//! | `targetTempCmd`     | in        | -        | 0            |
//! | `thermostatModeCmd` | in        | -        | 0            |

pub mod availability;
pub mod client;
pub mod command;
pub mod config;
pub mod discovery;
pub mod mqtt_handler;
pub mod state;
pub mod topics;

pub use client::{Broker, HubPublisher, MqttError};
pub use command::{Command, CommandDispatcher, CommandError, ThermostatMode};
pub use config::{BrokerSettings, MqttConfig};
pub use mqtt_handler::{ConnectionState, MqttHandler, SessionEvent};
pub use topics::{CommandKind, DeviceTopics, TopicScheme};
