use chrono::{Datelike, Local, TimeZone, Timelike};

use super::identity::DeviceIdentity;

/// Point-in-time reading of a thermostat
///
/// Produced fresh on every query and never cached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatusSnapshot {
    /// Heating output enabled
    pub power: bool,
    /// Relay currently producing heat
    pub active: bool,
    /// Target temperature in °C
    pub thermostat_temp: f32,
    /// Measured ambient temperature in °C
    pub external_temp: f32,
}

/// Wall clock value written into a device's onboard clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceClock {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Day of week, Monday = 1 .. Sunday = 7
    pub weekday: u8,
}

impl DeviceClock {
    pub fn from_datetime<Tz: TimeZone>(time: &chrono::DateTime<Tz>) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            weekday: time.weekday().number_from_monday() as u8,
        }
    }

    pub fn now_local() -> Self {
        Self::from_datetime(&Local::now())
    }
}

/// Errors raised by a thermostat or by its execution lane
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Device rejected the authentication handshake
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Device is not authenticated")]
    NotAuthenticated,

    /// Transient query or command failure on the transport
    #[error("Device I/O failure: {0}")]
    Io(String),

    /// Device answered with something it should not have
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation not supported by device: {0}")]
    Unsupported(&'static str),

    /// The lane that owns the device is gone
    #[error("Device lane closed")]
    LaneClosed,
}

/// Blocking interface of one physical thermostat.
///
/// Implementations own a transport session that is not safe for concurrent use;
/// callers never touch a `Thermostat` directly but go through a
/// [`DeviceHandle`](super::lane::DeviceHandle), which serializes every call.
pub trait Thermostat: Send + 'static {
    fn identity(&self) -> DeviceIdentity;

    /// Performs the authentication handshake; required once before any other call
    fn authenticate(&mut self) -> Result<(), DeviceError>;

    fn is_authenticated(&self) -> bool;

    fn status(&mut self) -> Result<StatusSnapshot, DeviceError>;

    fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError>;

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError>;

    /// Whether [`Thermostat::set_clock`] is available
    fn supports_clock(&self) -> bool {
        false
    }

    fn set_clock(&mut self, _clock: DeviceClock) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("clock"))
    }

    /// Sets the switching hysteresis in whole degrees
    fn set_deadzone(&mut self, _deadzone: u8) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("deadzone"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    #[test]
    fn clock_uses_monday_as_day_one() {
        // 2024-01-01 was a Monday
        let time = FixedOffset::east_opt(3600)
            .unwrap()
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(6, 30, 15)
                    .unwrap(),
            )
            .unwrap();
        let clock = DeviceClock::from_datetime(&time);
        assert_eq!(
            clock,
            DeviceClock {
                hour: 6,
                minute: 30,
                second: 15,
                weekday: 1
            }
        );
    }

    #[test]
    fn clock_maps_sunday_to_seven() {
        let time = FixedOffset::east_opt(0)
            .unwrap()
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 1, 7)
                    .unwrap()
                    .and_hms_opt(23, 59, 59)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(DeviceClock::from_datetime(&time).weekday, 7);
    }
}
