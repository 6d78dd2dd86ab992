use std::future::Future;

use rumqttc::{AsyncClient, QoS};

use super::topics::TopicScheme;

/// Errors raised while talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Broker request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The slice of a broker client the bridge needs.
///
/// Implemented for [`rumqttc::AsyncClient`]; tests use a recording fake.
pub trait Broker: Clone + Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;

    fn subscribe(&self, topic: &str, qos: QoS)
        -> impl Future<Output = Result<(), MqttError>> + Send;
}

impl Broker for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        AsyncClient::publish(self, topic, qos, retain, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        AsyncClient::subscribe(self, topic, qos).await?;
        Ok(())
    }
}

/// Publishing side of the bridge for one broker session.
///
/// Holds the broker client by value (clients are cheap handles) together with the
/// topic scheme, so every announcer, the state publisher and the liveness
/// messages derive their topics the same way. The operations themselves live in
/// `discovery.rs`, `state.rs` and `availability.rs`.
#[derive(Clone)]
pub struct HubPublisher<B> {
    pub(super) broker: B,
    pub(super) scheme: TopicScheme,
    pub(super) publish_action: bool,
}

impl<B: Broker> HubPublisher<B> {
    pub fn new(broker: B, scheme: TopicScheme, publish_action: bool) -> Self {
        Self {
            broker,
            scheme,
            publish_action,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }
}
