//! Discovery announcer
//!
//! Builds the retained config message that makes the hub create a climate entity.
//! Field names use the hub's abbreviated keys; serde keeps them in declaration
//! order, so an unchanged identity always yields byte-identical payloads.

use rumqttc::QoS;
use serde::Serialize;
use tracing::debug;

use crate::device::DeviceIdentity;

use super::availability::{OFFLINE, ONLINE};
use super::client::{Broker, HubPublisher, MqttError};
use super::command::ThermostatMode;
use super::topics::DeviceTopics;

const MANUFACTURER: &str = "Broadlink";

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ClimateDescriptor {
    pub name: String,
    pub unique_id: String,
    pub mode_cmd_t: String,
    pub mode_stat_t: String,
    pub mode_stat_tpl: &'static str,
    pub avty_t: String,
    pub pl_avail: &'static str,
    pub pl_not_avail: &'static str,
    pub temp_cmd_t: String,
    pub temp_stat_t: String,
    pub temp_stat_tpl: &'static str,
    pub curr_temp_t: String,
    pub curr_temp_tpl: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_template: Option<&'static str>,
    pub min_temp: &'static str,
    pub max_temp: &'static str,
    pub temp_step: &'static str,
    pub modes: [ThermostatMode; 2],
    pub device: DeviceInfo,
}

/// Derives the descriptor from identity and topics alone
pub fn build_descriptor(
    identity: &DeviceIdentity,
    topics: &DeviceTopics,
    publish_action: bool,
) -> ClimateDescriptor {
    let name = identity.display_name();
    let mac = identity.mac_hex();

    ClimateDescriptor {
        name: name.clone(),
        unique_id: mac.clone(),
        mode_cmd_t: topics.thermostat_mode_cmd.clone(),
        mode_stat_t: topics.state.clone(),
        mode_stat_tpl: "{{ value_json.mode }}",
        avty_t: topics.availability.clone(),
        pl_avail: ONLINE,
        pl_not_avail: OFFLINE,
        temp_cmd_t: topics.target_temp_cmd.clone(),
        temp_stat_t: topics.state.clone(),
        temp_stat_tpl: "{{ value_json.target_temp }}",
        curr_temp_t: topics.state.clone(),
        curr_temp_tpl: "{{ value_json.current_temp }}",
        action_topic: publish_action.then(|| topics.state.clone()),
        action_template: publish_action.then_some("{{ value_json.action }}"),
        min_temp: "5",
        max_temp: "35",
        temp_step: "0.5",
        modes: [ThermostatMode::Off, ThermostatMode::Heat],
        device: DeviceInfo {
            identifiers: vec![mac],
            name,
            model: identity.type_label().to_string(),
            manufacturer: MANUFACTURER,
        },
    }
}

impl<B: Broker> HubPublisher<B> {
    /// Publishes the retained discovery payload; no device I/O
    pub async fn publish_configuration(&self, identity: &DeviceIdentity) -> Result<(), MqttError> {
        let topics = self.scheme.for_device(identity);
        let descriptor = build_descriptor(identity, &topics, self.publish_action);
        let payload = serde_json::to_vec(&descriptor)?;

        debug!("Announcing {} on {}", identity, topics.config);
        self.broker
            .publish(&topics.config, QoS::AtMostOnce, true, payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::TopicScheme;
    use crate::testing::RecordingBroker;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("Hysen heating controller", [0x34, 0xea, 0x34, 0xb6, 0x1d, 0x2c])
    }

    #[test]
    fn descriptor_matches_hub_schema() {
        let identity = identity();
        let topics = TopicScheme::default().for_device(&identity);
        let value = serde_json::to_value(build_descriptor(&identity, &topics, true)).unwrap();
        let base = "homeassistant/climate/hysen_heating_controller_34ea34b61d2c";

        assert_eq!(
            value,
            json!({
                "name": "Hysen heating controller 34ea34b61d2c",
                "unique_id": "34ea34b61d2c",
                "mode_cmd_t": format!("{base}/thermostatModeCmd"),
                "mode_stat_t": format!("{base}/state"),
                "mode_stat_tpl": "{{ value_json.mode }}",
                "avty_t": format!("{base}/available"),
                "pl_avail": "online",
                "pl_not_avail": "offline",
                "temp_cmd_t": format!("{base}/targetTempCmd"),
                "temp_stat_t": format!("{base}/state"),
                "temp_stat_tpl": "{{ value_json.target_temp }}",
                "curr_temp_t": format!("{base}/state"),
                "curr_temp_tpl": "{{ value_json.current_temp }}",
                "action_topic": format!("{base}/state"),
                "action_template": "{{ value_json.action }}",
                "min_temp": "5",
                "max_temp": "35",
                "temp_step": "0.5",
                "modes": ["off", "heat"],
                "device": {
                    "identifiers": ["34ea34b61d2c"],
                    "name": "Hysen heating controller 34ea34b61d2c",
                    "model": "Hysen heating controller",
                    "manufacturer": "Broadlink"
                }
            })
        );
    }

    #[test]
    fn keys_keep_declaration_order() {
        let identity = identity();
        let topics = TopicScheme::default().for_device(&identity);
        let text = serde_json::to_string(&build_descriptor(&identity, &topics, true)).unwrap();
        assert!(text.starts_with("{\"name\":"));
        let unique = text.find("\"unique_id\"").unwrap();
        let action = text.find("\"action_topic\"").unwrap();
        let min_temp = text.find("\"min_temp\"").unwrap();
        assert!(unique < action && action < min_temp);
        assert!(text.ends_with("\"manufacturer\":\"Broadlink\"}}"));
    }

    #[test]
    fn action_fields_are_omitted_when_disabled() {
        let identity = identity();
        let topics = TopicScheme::default().for_device(&identity);
        let value = serde_json::to_value(build_descriptor(&identity, &topics, false)).unwrap();
        assert!(value.get("action_topic").is_none());
        assert!(value.get("action_template").is_none());
    }

    #[tokio::test]
    async fn configuration_is_retained_and_stable() {
        let broker = RecordingBroker::default();
        let publisher = HubPublisher::new(broker.clone(), TopicScheme::default(), true);
        let identity = identity();

        publisher.publish_configuration(&identity).await.unwrap();
        publisher.publish_configuration(&identity).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1]);
        assert!(published[0].retain);
        assert_eq!(published[0].qos, QoS::AtMostOnce);
        assert!(published[0].topic.ends_with("/config"));
    }
}
