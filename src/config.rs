//! Process configuration
//!
//! Layers, later ones win:
//!
//! 1. built-in defaults
//! 2. TOML file at `$HYSEN2MQTT_CONFIG`, else `<config dir>/hysen2mqtt/config.toml`
//! 3. environment variables (`MQTT_HOST`, `MQTT_PORT`, ...)
//!
//! A missing file is fine; a file that does not parse is not.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mqtt::MqttConfig;
use crate::scheduler::SchedulerSettings;

pub const CONFIG_PATH_VAR: &str = "HYSEN2MQTT_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Address to broadcast from; autodetected when unset
    pub local_ip: Option<Ipv4Addr>,
    /// Seconds to collect discovery answers
    pub timeout: u64,
    /// Seconds to wait for a device answer
    pub device_timeout: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            local_ip: None,
            timeout: 10,
            device_timeout: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub poll_interval: u64,
    pub config_interval: u64,
    pub availability_interval: u64,
    pub maintenance_interval: u64,
    pub device_deadzone: Option<u8>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            config_interval: 600,
            availability_interval: 600,
            maintenance_interval: 1800,
            device_deadzone: Some(1),
        }
    }
}

impl ScheduleConfig {
    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: Duration::from_secs(self.poll_interval),
            config_interval: Duration::from_secs(self.config_interval),
            availability_interval: Duration::from_secs(self.availability_interval),
            maintenance_interval: Duration::from_secs(self.maintenance_interval),
            deadzone: self.device_deadzone,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
    pub schedule: ScheduleConfig,
    /// Include the `action` field in state messages
    pub publish_action: bool,
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            discovery: DiscoveryConfig::default(),
            schedule: ScheduleConfig::default(),
            publish_action: true,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, then the config file if present, then the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let env = |key: &'static str| lookup(key).map(|value| (key, value));

        if let Some((_, host)) = env("MQTT_HOST") {
            self.mqtt.host = Some(host);
        }
        if let Some((key, port)) = env("MQTT_PORT") {
            self.mqtt.port = Some(parse(key, &port)?);
        }
        if let Some((_, user)) = env("MQTT_USER") {
            self.mqtt.user = Some(user);
        }
        if let Some((_, password)) = env("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some((_, prefix)) = env("MQTT_CLIENT_ID_PREFIX") {
            self.mqtt.client_id_prefix = prefix;
        }
        if let Some((_, prefix)) = env("DISCOVERY_PREFIX") {
            self.mqtt.discovery_prefix = prefix;
        }
        if let Some((key, secs)) = env("RECONNECT_DELAY") {
            self.mqtt.reconnect_delay = parse(key, &secs)?;
        }

        if let Some((key, ip)) = env("LOCAL_IP_ADDR") {
            self.discovery.local_ip = match ip.trim() {
                "" => None,
                ip => Some(parse(key, ip)?),
            };
        }
        if let Some((key, secs)) = env("DISCOVERY_TIMEOUT") {
            self.discovery.timeout = parse(key, &secs)?;
        }

        if let Some((key, secs)) = env("POLL_INTERVAL") {
            self.schedule.poll_interval = parse(key, &secs)?;
        }
        if let Some((key, secs)) = env("CONFIG_INTERVAL") {
            self.schedule.config_interval = parse(key, &secs)?;
        }
        if let Some((key, secs)) = env("AVAILABILITY_INTERVAL") {
            self.schedule.availability_interval = parse(key, &secs)?;
        }
        if let Some((key, secs)) = env("MAINTENANCE_INTERVAL") {
            self.schedule.maintenance_interval = parse(key, &secs)?;
        }
        if let Some((key, deadzone)) = env("DEVICE_DEADZONE") {
            self.schedule.device_deadzone = match deadzone.trim() {
                "" | "none" => None,
                value => Some(parse(key, value)?),
            };
        }

        if let Some((key, flag)) = env("PUBLISH_ACTION") {
            self.publish_action = parse(key, &flag)?;
        }
        if let Some((_, level)) = env("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("hysen2mqtt").join("config.toml")))
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
