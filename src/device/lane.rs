//! Per-device execution lane
//!
//! Every device gets exactly one blocking worker that owns its [`Thermostat`].
//! Poll jobs, maintenance jobs and command dispatch all talk to the worker through
//! a [`DeviceHandle`], so calls against one transport session run strictly one
//! after another.
//!
//! ```text
//! poll job ────┐
//! command ─────┼─[DeviceAction]─► lane worker ──► Thermostat
//! maintenance ─┘        ◄──── oneshot reply ────┘
//! ```

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::identity::DeviceIdentity;
use super::thermostat::{DeviceClock, DeviceError, StatusSnapshot, Thermostat};

const LANE_CAPACITY: usize = 32;

macro_rules! respond {
    ($response_tx:expr, $result:expr) => {
        if $response_tx.send($result).is_err() {
            warn!("Caller dropped before the device answered");
        }
    };
}

type Reply<T> = oneshot::Sender<Result<T, DeviceError>>;

#[derive(Debug)]
enum DeviceAction {
    Status { response_tx: Reply<StatusSnapshot> },
    SetTargetTemperature { celsius: f32, response_tx: Reply<()> },
    SetPower { on: bool, response_tx: Reply<()> },
    SyncClock { clock: DeviceClock, response_tx: Reply<()> },
    SetDeadzone { deadzone: u8, response_tx: Reply<()> },
}

/// Cloneable handle to a device's lane
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    identity: DeviceIdentity,
    supports_clock: bool,
    tx: mpsc::Sender<DeviceAction>,
}

impl DeviceHandle {
    /// Moves an authenticated device onto its own blocking worker.
    ///
    /// The worker lives until every handle is dropped, which in practice is
    /// process exit.
    pub fn spawn(device: Box<dyn Thermostat>) -> Self {
        let identity = device.identity();
        let supports_clock = device.supports_clock();
        let (tx, mut rx) = mpsc::channel::<DeviceAction>(LANE_CAPACITY);

        let lane_identity = identity.clone();
        info!("Starting device lane for {}", lane_identity);
        tokio::task::spawn_blocking(move || {
            let mut device = device;
            while let Some(action) = rx.blocking_recv() {
                debug!("{}: executing {:?}", lane_identity, action);
                match action {
                    DeviceAction::Status { response_tx } => {
                        respond!(response_tx, device.status());
                    }
                    DeviceAction::SetTargetTemperature {
                        celsius,
                        response_tx,
                    } => {
                        respond!(response_tx, device.set_target_temperature(celsius));
                    }
                    DeviceAction::SetPower { on, response_tx } => {
                        respond!(response_tx, device.set_power(on));
                    }
                    DeviceAction::SyncClock { clock, response_tx } => {
                        respond!(response_tx, device.set_clock(clock));
                    }
                    DeviceAction::SetDeadzone {
                        deadzone,
                        response_tx,
                    } => {
                        respond!(response_tx, device.set_deadzone(deadzone));
                    }
                }
            }
            error!("Device lane for {} stopped", lane_identity);
        });

        Self {
            identity,
            supports_clock,
            tx,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn supports_clock(&self) -> bool {
        self.supports_clock
    }

    pub async fn status(&self) -> Result<StatusSnapshot, DeviceError> {
        self.request(|response_tx| DeviceAction::Status { response_tx })
            .await
    }

    pub async fn set_target_temperature(&self, celsius: f32) -> Result<(), DeviceError> {
        self.request(|response_tx| DeviceAction::SetTargetTemperature {
            celsius,
            response_tx,
        })
        .await
    }

    pub async fn set_power(&self, on: bool) -> Result<(), DeviceError> {
        self.request(|response_tx| DeviceAction::SetPower { on, response_tx })
            .await
    }

    pub async fn sync_clock(&self, clock: DeviceClock) -> Result<(), DeviceError> {
        self.request(|response_tx| DeviceAction::SyncClock { clock, response_tx })
            .await
    }

    pub async fn set_deadzone(&self, deadzone: u8) -> Result<(), DeviceError> {
        self.request(|response_tx| DeviceAction::SetDeadzone {
            deadzone,
            response_tx,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DeviceAction,
    ) -> Result<T, DeviceError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| DeviceError::LaneClosed)?;
        response_rx.await.map_err(|_| DeviceError::LaneClosed)?
    }
}
