use std::time::Duration;

use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::device::DeviceIdentity;

use super::availability::last_will;
use super::topics::{TopicScheme, DEFAULT_DISCOVERY_PREFIX};

/// Broker section of the configuration file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
    pub discovery_prefix: String,
    /// Seconds
    pub keep_alive: u64,
    /// Seconds to wait before polling the event loop again after a connection error
    pub reconnect_delay: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            client_id_prefix: "hysen2mqtt".to_string(),
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            keep_alive: 30,
            reconnect_delay: 5,
        }
    }
}

/// Validated connection parameters
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub scheme: TopicScheme,
}

impl MqttConfig {
    /// Checks that every required value is present
    pub fn resolve(&self) -> Result<BrokerSettings, ConfigError> {
        let host = required(&self.host, "MQTT_HOST")?;
        let user = required(&self.user, "MQTT_USER")?;
        let password = required(&self.password, "MQTT_PASSWORD")?;
        let port = self.port.ok_or(ConfigError::Missing("MQTT_PORT"))?;

        Ok(BrokerSettings {
            host,
            port,
            user,
            password,
            client_id_prefix: self.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(self.keep_alive),
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
            scheme: TopicScheme::new(&self.discovery_prefix),
        })
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::Missing(key)),
    }
}

impl BrokerSettings {
    pub fn client_id(&self, identity: &DeviceIdentity) -> String {
        format!("{}-{}", self.client_id_prefix, identity)
    }

    /// Options for the session serving `identity`, with its will attached
    pub fn options_for(&self, identity: &DeviceIdentity) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(self.client_id(identity), &self.host, self.port);
        mqtt_options
            .set_credentials(self.user.clone(), self.password.clone())
            .set_keep_alive(self.keep_alive)
            .set_last_will(last_will(&self.scheme, identity));
        mqtt_options
    }
}
