use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::Registry;

use super::client::{Broker, HubPublisher};
use super::command::CommandDispatcher;
use super::config::BrokerSettings;
use super::topics::CommandKind;

const REQUEST_CAPACITY: usize = 100;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Session is being (re)established or the ready sequence is running
    Connecting,
    /// Ready sequence completed for every device
    Ready,
    /// Connected, but at least one ready step failed
    Degraded,
}

/// Broker notifications the supervisor cares about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    MessageReceived { topic: String, payload: Vec<u8> },
    Disconnected(String),
}

/// Creates the client and event loop for the session serving the single device
/// in `registry`.
pub fn connect(settings: &BrokerSettings, registry: &Registry) -> Option<(AsyncClient, EventLoop)> {
    if registry.len() > 1 {
        warn!(
            "One session serves {} devices; only the first gets a last will",
            registry.len()
        );
    }
    let identity = registry.handles().next()?.identity();
    info!("Connecting to {}:{} as {}", settings.host, settings.port, settings.client_id(identity));
    Some(AsyncClient::new(settings.options_for(identity), REQUEST_CAPACITY))
}

/// Drives the event loop and forwards what matters as [`SessionEvent`]s.
///
/// Polling again after an error is what makes the client reconnect, so errors
/// only cost a pause of `reconnect_delay`. The pump ends when the receiver is
/// dropped.
pub fn spawn_event_pump(
    mut eventloop: EventLoop,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        Some(SessionEvent::Connected)
                    } else {
                        warn!("Broker refused connection: {:?}", ack.code);
                        None
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => Some(SessionEvent::MessageReceived {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }),
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    Some(SessionEvent::Disconnected("broker sent disconnect".to_string()))
                }
                Ok(_) => None,
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    if events.send(SessionEvent::Disconnected(e.to_string())).is_err() {
                        break;
                    }
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            };

            if let Some(event) = event {
                if events.send(event).is_err() {
                    break;
                }
            }
        }
        debug!("Event pump stopped");
    })
}

/// Connection supervisor of one broker session
pub struct MqttHandler<B> {
    publisher: HubPublisher<B>,
    dispatcher: CommandDispatcher<B>,
    registry: Registry,
    state_tx: watch::Sender<ConnectionState>,
}

impl<B: Broker> MqttHandler<B> {
    pub fn new(publisher: HubPublisher<B>, registry: Registry) -> Self {
        let dispatcher = CommandDispatcher::new(publisher.clone(), registry.clone());
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            publisher,
            dispatcher,
            registry,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Consumes session events until the pump goes away
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        self.set_state(ConnectionState::Connecting);
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        warn!("Session event channel closed");
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                info!("Connected to broker");
                self.on_connected().await;
            }
            SessionEvent::MessageReceived { topic, payload } => {
                self.dispatcher.on_command(&topic, &payload).await;
            }
            SessionEvent::Disconnected(reason) => {
                if self.state() != ConnectionState::Disconnected {
                    warn!("Disconnected from broker: {}", reason);
                }
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Ready sequence, one phase at a time across all served devices:
    /// subscribe commands, announce config, announce availability, publish state.
    pub async fn on_connected(&self) {
        self.set_state(ConnectionState::Connecting);
        let mut failures = 0usize;

        for device in self.registry.handles() {
            let topics = self.publisher.scheme().for_device(device.identity());
            for kind in CommandKind::ALL {
                let topic = topics.command(kind);
                if let Err(e) = self.publisher.broker().subscribe(topic, QoS::AtMostOnce).await {
                    error!("Failed to subscribe to {}: {}", topic, e);
                    failures += 1;
                }
            }
        }

        for device in self.registry.handles() {
            if let Err(e) = self.publisher.publish_configuration(device.identity()).await {
                error!("Failed to announce {}: {}", device.identity(), e);
                failures += 1;
            }
        }

        for device in self.registry.handles() {
            if let Err(e) = self.publisher.publish_available(device.identity()).await {
                error!("Failed to announce availability of {}: {}", device.identity(), e);
                failures += 1;
            }
        }

        for device in self.registry.handles() {
            if let Err(e) = self.publisher.publish_state(device).await {
                error!("Failed to publish state of {}: {}", device.identity(), e);
                failures += 1;
            }
        }

        if failures == 0 {
            info!("Session ready for {} device(s)", self.registry.len());
            self.set_state(ConnectionState::Ready);
        } else {
            error!("Session degraded: {} ready step(s) failed", failures);
            self.set_state(ConnectionState::Degraded);
        }
    }
}
