//! # Periodic Scheduler
//!
//! Every device runs four independent recurring jobs, each driven by its own
//! [`PeriodicJob`] state machine:
//!
//! ```text
//! Idle ──arm──► Sleeping(delay) ──sleep──► Running ──run_once──► Sleeping(rest of interval) ─┐
//!                      ▲                                                                    │
//!                      └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Job                  | Default | First run      |
//! |----------------------|---------|----------------|
//! | state poll           | 30 s    | immediately    |
//! | config republish     | 600 s   | after a period |
//! | availability         | 600 s   | after a period |
//! | maintenance          | 1800 s  | immediately    |
//!
//! Each tick runs in its own task, so an error or a panic only costs that tick.

pub mod job;

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::device::{DeviceClock, DeviceError, DeviceHandle};
use crate::mqtt::state::PublishStateError;
use crate::mqtt::{Broker, HubPublisher, MqttError};

pub use job::{FirstRun, JobBody, PeriodicJob};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    State(#[from] PublishStateError),

    #[error(transparent)]
    Mqtt(#[from] MqttError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    StatePoll,
    ConfigRepublish,
    AvailabilityRepublish,
    Maintenance,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            JobKind::StatePoll => "state poll",
            JobKind::ConfigRepublish => "config republish",
            JobKind::AvailabilityRepublish => "availability republish",
            JobKind::Maintenance => "maintenance",
        }
    }

    pub fn first_run(self) -> FirstRun {
        match self {
            JobKind::StatePoll | JobKind::Maintenance => FirstRun::Immediately,
            JobKind::ConfigRepublish | JobKind::AvailabilityRepublish => FirstRun::AfterOnePeriod,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub config_interval: Duration,
    pub availability_interval: Duration,
    pub maintenance_interval: Duration,
    /// Hysteresis enforced by the maintenance job; `None` leaves the device alone
    pub deadzone: Option<u8>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            config_interval: Duration::from_secs(600),
            availability_interval: Duration::from_secs(600),
            maintenance_interval: Duration::from_secs(1800),
            deadzone: Some(1),
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::StatePoll => self.poll_interval,
            JobKind::ConfigRepublish => self.config_interval,
            JobKind::AvailabilityRepublish => self.availability_interval,
            JobKind::Maintenance => self.maintenance_interval,
        }
    }
}

/// Owner of every recurring job task
#[derive(Debug)]
pub struct Scheduler {
    settings: SchedulerSettings,
    jobs: JoinSet<()>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            jobs: JoinSet::new(),
        }
    }

    pub fn spawn_job(&mut self, name: String, interval: Duration, first_run: FirstRun, body: JobBody) {
        let job = PeriodicJob::create(name, interval, first_run, body);
        self.jobs.spawn(job.run_forever());
    }

    fn spawn_kind(&mut self, kind: JobKind, device: &DeviceHandle, body: JobBody) {
        self.spawn_job(
            format!("{} {}", device.identity(), kind.label()),
            self.settings.interval(kind),
            kind.first_run(),
            body,
        );
    }

    /// Starts the recurring jobs of one device.
    ///
    /// Maintenance is only scheduled for devices with a settable clock.
    pub fn spawn_device_jobs<B: Broker>(&mut self, publisher: HubPublisher<B>, device: DeviceHandle) {
        let (p, d) = (publisher.clone(), device.clone());
        self.spawn_kind(
            JobKind::StatePoll,
            &device,
            JobBody::new(move || {
                let (p, d) = (p.clone(), d.clone());
                async move { p.publish_state(&d).await.map_err(JobError::from) }
            }),
        );

        let (p, d) = (publisher.clone(), device.clone());
        self.spawn_kind(
            JobKind::ConfigRepublish,
            &device,
            JobBody::new(move || {
                let (p, d) = (p.clone(), d.clone());
                async move { p.publish_configuration(d.identity()).await.map_err(JobError::from) }
            }),
        );

        let (p, d) = (publisher, device.clone());
        self.spawn_kind(
            JobKind::AvailabilityRepublish,
            &device,
            JobBody::new(move || {
                let (p, d) = (p.clone(), d.clone());
                async move { p.publish_available(d.identity()).await.map_err(JobError::from) }
            }),
        );

        if !device.supports_clock() {
            warn!("{} has no settable clock; skipping maintenance", device.identity());
            return;
        }
        let deadzone = self.settings.deadzone;
        let d = device.clone();
        self.spawn_kind(
            JobKind::Maintenance,
            &device,
            JobBody::new(move || maintain(d.clone(), deadzone)),
        );
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Waits on the job set; jobs never finish on their own, so any exit is logged
    pub async fn supervise(mut self) {
        info!("Supervising {} job(s)", self.jobs.len());
        while let Some(result) = self.jobs.join_next().await {
            match result {
                Ok(()) => error!("A recurring job stopped"),
                Err(e) => error!("A recurring job died: {}", e),
            }
        }
        warn!("No recurring jobs left");
    }
}

/// Clock sync followed by the deadzone write; both are tried even if one fails
async fn maintain(device: DeviceHandle, deadzone: Option<u8>) -> Result<(), JobError> {
    info!("Setting {} time", device.identity());
    let clock = device.sync_clock(DeviceClock::now_local()).await;
    if let Err(e) = &clock {
        error!("Clock sync failed for {}: {}", device.identity(), e);
    }

    if let Some(deadzone) = deadzone {
        device.set_deadzone(deadzone).await?;
    }
    Ok(clock?)
}
