//! Liveness signalling

use rumqttc::{LastWill, QoS};
use tracing::debug;

use crate::device::DeviceIdentity;

use super::client::{Broker, HubPublisher, MqttError};
use super::topics::TopicScheme;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Will registered with the broker before connecting; the broker publishes it
/// retained when the session drops uncleanly.
pub fn last_will(scheme: &TopicScheme, identity: &DeviceIdentity) -> LastWill {
    LastWill::new(
        scheme.for_device(identity).availability,
        OFFLINE,
        QoS::AtMostOnce,
        true,
    )
}

impl<B: Broker> HubPublisher<B> {
    pub async fn publish_available(&self, identity: &DeviceIdentity) -> Result<(), MqttError> {
        let topic = self.scheme.for_device(identity).availability;
        debug!("{} is {}", identity, ONLINE);
        self.broker
            .publish(&topic, QoS::AtLeastOnce, true, ONLINE.as_bytes().to_vec())
            .await
    }
}
