pub mod broadlink;
pub mod config;
pub mod device;
pub mod error;
pub mod mqtt;
pub mod scheduler;

#[cfg(test)]
mod testing;

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use config::BridgeConfig;
use device::Registry;
use error::BridgeError;
use mqtt::mqtt_handler::{self, ConnectionState, MqttHandler};
use mqtt::{BrokerSettings, HubPublisher};
use scheduler::Scheduler;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    install_error_reporting()?;
    let (config, settings) = load_config()?;
    setup_logging_env(&config.log_level);

    let registry = discover(&config).await?;

    let mut scheduler = Scheduler::new(config.schedule.settings());
    for part in registry.split_per_device() {
        start_session(&settings, part, config.publish_action, &mut scheduler);
    }

    info!("Bridge running with {} recurring job(s)", scheduler.len());
    scheduler.supervise().await;
    Err(eyre!("All recurring jobs stopped"))
}

fn install_error_reporting() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(default_level: &str) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", default_level)
    }
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Reads the configuration and resolves the broker settings
fn load_config() -> Result<(BridgeConfig, BrokerSettings), BridgeError> {
    let config = BridgeConfig::load()?;
    let settings = config.mqtt.resolve()?;
    Ok((config, settings))
}

/// Finds Hysen controllers on the LAN and authenticates them
async fn discover(config: &BridgeConfig) -> Result<Registry, BridgeError> {
    let discovery = config.discovery.clone();
    let thermostats = tokio::task::spawn_blocking(move || {
        broadlink::discover_thermostats(
            Duration::from_secs(discovery.timeout),
            discovery.local_ip,
            Duration::from_secs(discovery.device_timeout),
        )
    })
    .await??;

    Registry::build(thermostats).await
}

/// Opens the broker session for one device and schedules its jobs
fn start_session(
    settings: &BrokerSettings,
    registry: Registry,
    publish_action: bool,
    scheduler: &mut Scheduler,
) {
    let Some((client, eventloop)) = mqtt_handler::connect(settings, &registry) else {
        warn!("Skipping empty registry");
        return;
    };

    let publisher = HubPublisher::new(client, settings.scheme.clone(), publish_action);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    mqtt_handler::spawn_event_pump(eventloop, settings.reconnect_delay, events_tx);

    let handler = MqttHandler::new(publisher.clone(), registry.clone());
    tokio::spawn(log_connection_state(handler.subscribe_state()));
    tokio::spawn(handler.run(events_rx));

    for device in registry.handles() {
        scheduler.spawn_device_jobs(publisher.clone(), device.clone());
    }
}

async fn log_connection_state(mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        match *state.borrow_and_update() {
            ConnectionState::Degraded => error!("Broker session degraded"),
            other => info!("Broker session {:?}", other),
        }
    }
}
