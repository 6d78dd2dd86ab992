//! Topic naming for climate entities
//!
//! All topics of a device live under `<discovery_prefix>/climate/<device_id>/`.
//! Building them is pure and depends only on the identity, so restarts and
//! discovery order never move a device to another topic.

use crate::device::DeviceIdentity;

use super::command::CommandError;

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
const COMPONENT: &str = "climate";

const CONFIG_SUFFIX: &str = "config";
const STATE_SUFFIX: &str = "state";
const AVAILABILITY_SUFFIX: &str = "available";

/// Inbound command topics a device subscribes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    TargetTemperature,
    ThermostatMode,
}

impl CommandKind {
    pub const ALL: [CommandKind; 2] = [CommandKind::TargetTemperature, CommandKind::ThermostatMode];

    pub fn suffix(self) -> &'static str {
        match self {
            CommandKind::TargetTemperature => "targetTempCmd",
            CommandKind::ThermostatMode => "thermostatModeCmd",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Full topic family of one device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceTopics {
    pub base: String,
    pub config: String,
    pub state: String,
    pub availability: String,
    pub target_temp_cmd: String,
    pub thermostat_mode_cmd: String,
}

impl DeviceTopics {
    pub fn command(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::TargetTemperature => &self.target_temp_cmd,
            CommandKind::ThermostatMode => &self.thermostat_mode_cmd,
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            &self.config,
            &self.state,
            &self.availability,
            &self.target_temp_cmd,
            &self.thermostat_mode_cmd,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicScheme {
    discovery_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_PREFIX)
    }
}

impl TopicScheme {
    pub fn new(discovery_prefix: &str) -> Self {
        Self {
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn for_device(&self, identity: &DeviceIdentity) -> DeviceTopics {
        let base = format!("{}/{}/{}", self.discovery_prefix, COMPONENT, identity);
        DeviceTopics {
            config: format!("{}/{}", base, CONFIG_SUFFIX),
            state: format!("{}/{}", base, STATE_SUFFIX),
            availability: format!("{}/{}", base, AVAILABILITY_SUFFIX),
            target_temp_cmd: format!("{}/{}", base, CommandKind::TargetTemperature.suffix()),
            thermostat_mode_cmd: format!("{}/{}", base, CommandKind::ThermostatMode.suffix()),
            base,
        }
    }

    /// Splits an inbound command topic into device id and command kind.
    ///
    /// Does not consult the registry; an unknown device id is the caller's
    /// problem.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Result<(&'a str, CommandKind), CommandError> {
        let unknown = || CommandError::UnknownTopic(topic.to_string());

        let rest = topic
            .strip_prefix(self.discovery_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(COMPONENT))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;

        match rest.split('/').collect::<Vec<&str>>().as_slice() {
            [device_id, suffix] if !device_id.is_empty() => CommandKind::from_suffix(suffix)
                .map(|kind| (*device_id, kind))
                .ok_or_else(|| CommandError::UnknownCommand {
                    device: device_id.to_string(),
                    suffix: suffix.to_string(),
                }),
            _ => Err(unknown()),
        }
    }
}
