//! Inbound command handling
//!
//! A command message goes through three explicit steps:
//!
//! 1. topic → (device, [`CommandKind`]) via the [`TopicScheme`](super::TopicScheme); unknown devices and
//!    unknown suffixes stop here
//! 2. payload → [`Command`]; malformed payloads become [`CommandError::InvalidPayload`]
//! 3. apply on the device lane, then republish the device state once

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceHandle, Registry};

use super::client::{Broker, HubPublisher};
use super::topics::CommandKind;

/// Bounds advertised in the discovery payload
pub const MIN_TEMPERATURE: f32 = 5.0;
pub const MAX_TEMPERATURE: f32 = 35.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatMode {
    Off,
    Heat,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThermostatMode::Off => "off",
            ThermostatMode::Heat => "heat",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    SetTargetTemperature(f32),
    SetThermostatMode(ThermostatMode),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Topic outside the climate namespace: {0}")]
    UnknownTopic(String),

    #[error("No registered device {0}")]
    UnknownDevice(String),

    #[error("Unknown command {suffix} for {device}")]
    UnknownCommand { device: String, suffix: String },

    #[error("Invalid payload {payload:?} for {kind}")]
    InvalidPayload { kind: CommandKind, payload: String },
}

impl Command {
    /// Parses and validates a raw payload for the given command kind
    pub fn parse(kind: CommandKind, payload: &[u8]) -> Result<Self, CommandError> {
        let invalid = || CommandError::InvalidPayload {
            kind,
            payload: String::from_utf8_lossy(payload).into_owned(),
        };
        let text = std::str::from_utf8(payload).map_err(|_| invalid())?;

        match kind {
            CommandKind::TargetTemperature => {
                let celsius: f32 = text.trim().parse().map_err(|_| invalid())?;
                if !celsius.is_finite() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&celsius) {
                    return Err(invalid());
                }
                Ok(Command::SetTargetTemperature(celsius))
            }
            CommandKind::ThermostatMode => match text {
                "off" => Ok(Command::SetThermostatMode(ThermostatMode::Off)),
                "heat" => Ok(Command::SetThermostatMode(ThermostatMode::Heat)),
                _ => Err(invalid()),
            },
        }
    }
}

/// Routes command messages to the device named in their topic
#[derive(Clone)]
pub struct CommandDispatcher<B> {
    publisher: HubPublisher<B>,
    registry: Registry,
}

impl<B: Broker> CommandDispatcher<B> {
    pub fn new(publisher: HubPublisher<B>, registry: Registry) -> Self {
        Self {
            publisher,
            registry,
        }
    }

    /// Handles one inbound message; every failure is logged here and goes no further
    pub async fn on_command(&self, topic: &str, payload: &[u8]) {
        match self.dispatch(topic, payload).await {
            Ok(command) => debug!("Handled {:?} from {}", command, topic),
            Err(e @ CommandError::InvalidPayload { .. }) => warn!("Dropped command: {}", e),
            Err(e) => warn!("Rejected message on {}: {}", topic, e),
        }
    }

    /// Resolves, validates and applies one command.
    ///
    /// Unknown topics and devices return before touching any device. Once the
    /// device is known, exactly one state republish follows, whether the payload
    /// was valid, the device call failed, or everything went through.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<Command, CommandError> {
        let (device, kind) = self.resolve(topic)?;

        debug!(
            "Calling handler for {}: {}({})",
            device.identity(),
            kind,
            String::from_utf8_lossy(payload)
        );

        let parsed = Command::parse(kind, payload);
        if let Ok(command) = &parsed {
            self.apply(device, *command).await;
        }

        if let Err(e) = self.publisher.publish_state(device).await {
            error!(
                "Failed to republish state for {} after command: {}",
                device.identity(),
                e
            );
        }

        parsed
    }

    fn resolve(&self, topic: &str) -> Result<(&DeviceHandle, CommandKind), CommandError> {
        let (device_id, kind) = self.publisher.scheme().parse_command(topic)?;
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| CommandError::UnknownDevice(device_id.to_string()))?;
        Ok((device, kind))
    }

    async fn apply(&self, device: &DeviceHandle, command: Command) {
        let result = match command {
            Command::SetTargetTemperature(celsius) => {
                info!("Setting {} target temperature to {}", device.identity(), celsius);
                device.set_target_temperature(celsius).await
            }
            Command::SetThermostatMode(mode) => {
                info!("Setting {} power mode to {}", device.identity(), mode.as_str());
                device.set_power(mode == ThermostatMode::Heat).await
            }
        };

        if let Err(e) = result {
            error!("Failed to apply {:?} to {}: {}", command, device.identity(), e);
        }
    }
}
