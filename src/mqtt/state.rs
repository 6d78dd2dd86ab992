//! State publisher

use rumqttc::QoS;
use serde::Serialize;
use tracing::debug;

use crate::device::{DeviceError, DeviceHandle, StatusSnapshot};

use super::client::{Broker, HubPublisher, MqttError};
use super::command::ThermostatMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Heating,
    Idle,
}

/// Normalized state message shared by the mode, temperature and action templates
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatePayload {
    pub mode: ThermostatMode,
    pub target_temp: String,
    pub current_temp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<HvacAction>,
}

impl StatePayload {
    pub fn from_snapshot(snapshot: &StatusSnapshot, include_action: bool) -> Self {
        let (mode, action) = match (snapshot.power, snapshot.active) {
            (false, _) => (ThermostatMode::Off, HvacAction::Off),
            (true, true) => (ThermostatMode::Heat, HvacAction::Heating),
            (true, false) => (ThermostatMode::Heat, HvacAction::Idle),
        };

        Self {
            mode,
            target_temp: format_temperature(snapshot.thermostat_temp),
            current_temp: format_temperature(snapshot.external_temp),
            action: include_action.then_some(action),
        }
    }
}

/// Decimal string with at least one fractional digit: `22` → `"22.0"`, `19.5` → `"19.5"`
pub fn format_temperature(celsius: f32) -> String {
    if celsius.fract() == 0.0 {
        format!("{:.1}", celsius)
    } else {
        format!("{}", celsius)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishStateError {
    #[error("Status query failed: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Mqtt(#[from] MqttError),
}

impl<B: Broker> HubPublisher<B> {
    /// Queries a fresh snapshot on the device lane and publishes it
    pub async fn publish_state(&self, device: &DeviceHandle) -> Result<(), PublishStateError> {
        let snapshot = device.status().await?;
        let payload = StatePayload::from_snapshot(&snapshot, self.publish_action);
        let topic = self.scheme.for_device(device.identity()).state;

        debug!("{}: {:?}", device.identity(), payload);
        let payload = serde_json::to_vec(&payload).map_err(MqttError::from)?;
        self.broker
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::TopicScheme;
    use crate::testing::{FakeThermostat, RecordingBroker};
    use pretty_assertions::assert_eq;

    fn snapshot(power: bool, active: bool) -> StatusSnapshot {
        StatusSnapshot {
            power,
            active,
            thermostat_temp: 22.0,
            external_temp: 19.5,
        }
    }

    #[test]
    fn heating_snapshot_serializes_compactly() {
        let payload = StatePayload::from_snapshot(&snapshot(true, true), true);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"mode":"heat","target_temp":"22.0","current_temp":"19.5","action":"heating"}"#
        );
    }

    #[test]
    fn powered_off_wins_over_active() {
        for active in [true, false] {
            let payload = StatePayload::from_snapshot(&snapshot(false, active), true);
            assert_eq!(payload.mode, ThermostatMode::Off);
            assert_eq!(payload.action, Some(HvacAction::Off));
        }
    }

    #[test]
    fn idle_when_powered_but_not_heating() {
        let payload = StatePayload::from_snapshot(&snapshot(true, false), true);
        assert_eq!(payload.action, Some(HvacAction::Idle));
    }

    #[test]
    fn action_can_be_left_out() {
        let payload = StatePayload::from_snapshot(&snapshot(true, true), false);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"mode":"heat","target_temp":"22.0","current_temp":"19.5"}"#
        );
    }

    #[test]
    fn temperatures_keep_a_fractional_digit() {
        assert_eq!(format_temperature(22.0), "22.0");
        assert_eq!(format_temperature(19.5), "19.5");
        assert_eq!(format_temperature(0.0), "0.0");
        assert_eq!(format_temperature(-3.5), "-3.5");
    }

    #[tokio::test]
    async fn state_goes_out_at_least_once_unretained() {
        let broker = RecordingBroker::default();
        let publisher = HubPublisher::new(broker.clone(), TopicScheme::default(), true);
        let device = DeviceHandle::spawn(Box::new(FakeThermostat::authenticated([1, 2, 3, 4, 5, 6])));

        publisher.publish_state(&device).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(!published[0].retain);
        assert!(published[0].topic.ends_with("/state"));
        assert_eq!(published[0].json()["mode"], "heat");
    }

    #[tokio::test]
    async fn query_failure_is_returned_and_nothing_published() {
        let broker = RecordingBroker::default();
        let publisher = HubPublisher::new(broker.clone(), TopicScheme::default(), true);
        let fake = FakeThermostat::authenticated([1, 2, 3, 4, 5, 6]);
        fake.state().lock().unwrap().fail_status = true;
        let device = DeviceHandle::spawn(Box::new(fake));

        let result = publisher.publish_state(&device).await;

        assert!(matches!(result, Err(PublishStateError::Device(_))));
        assert!(broker.published().is_empty());
    }
}
