//! Hysen heating controller
//!
//! Requests are Modbus-like register reads and writes wrapped in a small frame:
//! `[len+2 (LE u16), request.., crc16-modbus (LE)]`. Answers come back as
//! `[data end (LE u16), data.., crc16-modbus (LE)]`.

use std::time::Duration;

use crc::{Crc, CRC_16_MODBUS};
use tracing::{debug, info};

use crate::device::{DeviceClock, DeviceError, DeviceIdentity, StatusSnapshot, Thermostat};

use super::discovery::DiscoveredDevice;
use super::protocol::{Connection, ProtocolError, CMD_REQUEST};

pub const HYSEN_DEVTYPE: u16 = 0x4ead;
pub const HYSEN_LABEL: &str = "Hysen heating controller";

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
const FULL_STATUS_LEN: usize = 23;

const READ_FULL_STATUS: [u8; 6] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x16];

pub fn frame_request(request: &[u8]) -> Vec<u8> {
    let crc = MODBUS.checksum(request);
    let mut frame = Vec::with_capacity(request.len() + 4);
    frame.extend_from_slice(&((request.len() + 2) as u16).to_le_bytes());
    frame.extend_from_slice(request);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

pub fn unframe_response(payload: &[u8]) -> Result<&[u8], ProtocolError> {
    if payload.len() < 2 {
        return Err(ProtocolError::Truncated {
            got: payload.len(),
            need: 2,
        });
    }
    let end = usize::from(u16::from_le_bytes([payload[0], payload[1]]));
    if end < 2 || payload.len() < end + 2 {
        return Err(ProtocolError::Truncated {
            got: payload.len(),
            need: end + 2,
        });
    }

    let expected = u16::from_le_bytes([payload[end], payload[end + 1]]);
    let actual = MODBUS.checksum(&payload[2..end]);
    if expected != actual {
        return Err(ProtocolError::Checksum { expected, actual });
    }
    Ok(&payload[2..end])
}

/// Decoded answer to the full status read
#[derive(Clone, Debug, PartialEq)]
pub struct FullStatus {
    pub remote_lock: bool,
    pub power: bool,
    pub active: bool,
    pub temp_manual: bool,
    pub room_temp: f32,
    pub thermostat_temp: f32,
    pub auto_mode: u8,
    pub loop_mode: u8,
    pub advanced: AdvancedSettings,
    pub external_temp: f32,
    pub clock: DeviceClock,
}

/// Writable advanced block; a write always sends every field
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdvancedSettings {
    pub loop_mode: u8,
    pub sensor: u8,
    pub osv: u8,
    /// Switching hysteresis
    pub dif: u8,
    pub svh: u8,
    pub svl: u8,
    pub room_temp_adj: f32,
    pub fre: u8,
    pub poweron: u8,
}

impl FullStatus {
    pub fn decode(p: &[u8]) -> Result<Self, ProtocolError> {
        if p.len() < FULL_STATUS_LEN {
            return Err(ProtocolError::Truncated {
                got: p.len(),
                need: FULL_STATUS_LEN,
            });
        }

        let loop_mode = (p[7] >> 4) & 0x0f;
        Ok(Self {
            remote_lock: p[3] & 1 == 1,
            power: p[4] & 1 == 1,
            active: (p[4] >> 4) & 1 == 1,
            temp_manual: (p[4] >> 6) & 1 == 1,
            room_temp: f32::from(p[5]) / 2.0,
            thermostat_temp: f32::from(p[6]) / 2.0,
            auto_mode: p[7] & 0x0f,
            loop_mode,
            advanced: AdvancedSettings {
                loop_mode,
                sensor: p[8],
                osv: p[9],
                dif: p[10],
                svh: p[11],
                svl: p[12],
                room_temp_adj: f32::from(i16::from_be_bytes([p[13], p[14]])) / 2.0,
                fre: p[15],
                poweron: p[16],
            },
            external_temp: f32::from(p[18]) / 2.0,
            clock: DeviceClock {
                hour: p[19],
                minute: p[20],
                second: p[21],
                weekday: p[22],
            },
        })
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            power: self.power,
            active: self.active,
            thermostat_temp: self.thermostat_temp,
            external_temp: self.external_temp,
        }
    }
}

pub fn set_temperature_request(celsius: f32) -> [u8; 6] {
    let half_degrees = (celsius * 2.0).round().clamp(0.0, 255.0) as u8;
    [0x01, 0x06, 0x00, 0x01, 0x00, half_degrees]
}

pub fn set_power_request(on: bool, remote_lock: bool) -> [u8; 6] {
    [0x01, 0x06, 0x00, 0x00, u8::from(remote_lock), u8::from(on)]
}

pub fn set_time_request(clock: DeviceClock) -> [u8; 11] {
    [
        0x01,
        0x10,
        0x00,
        0x08,
        0x00,
        0x02,
        0x04,
        clock.hour,
        clock.minute,
        clock.second,
        clock.weekday,
    ]
}

pub fn set_advanced_request(settings: &AdvancedSettings) -> [u8; 17] {
    let [adj_hi, adj_lo] = ((settings.room_temp_adj * 2.0).round() as i16).to_be_bytes();
    [
        0x01,
        0x10,
        0x00,
        0x02,
        0x00,
        0x05,
        0x0a,
        settings.loop_mode,
        settings.sensor,
        settings.osv,
        settings.dif,
        settings.svh,
        settings.svl,
        adj_hi,
        adj_lo,
        settings.fre,
        settings.poweron,
    ]
}

/// Hysen controller reached over its Broadlink session
pub struct HysenThermostat {
    identity: DeviceIdentity,
    connection: Connection,
    authenticated: bool,
}

impl HysenThermostat {
    pub fn is_hysen(device: &DiscoveredDevice) -> bool {
        device.devtype == HYSEN_DEVTYPE
    }

    pub fn connect(device: &DiscoveredDevice, timeout: Duration) -> Result<Self, ProtocolError> {
        let connection = Connection::open(device.host, device.devtype, device.mac, timeout)?;
        Ok(Self {
            identity: DeviceIdentity::new(HYSEN_LABEL, device.mac),
            connection,
            authenticated: false,
        })
    }

    fn request(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError> {
        if !self.authenticated {
            return Err(DeviceError::NotAuthenticated);
        }
        let payload = self.connection.send(CMD_REQUEST, &frame_request(request))?;
        Ok(unframe_response(&payload)?.to_vec())
    }

    pub fn full_status(&mut self) -> Result<FullStatus, DeviceError> {
        let data = self.request(&READ_FULL_STATUS)?;
        Ok(FullStatus::decode(&data)?)
    }
}

impl Thermostat for HysenThermostat {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn authenticate(&mut self) -> Result<(), DeviceError> {
        self.connection
            .authenticate()
            .map_err(|e| DeviceError::Authentication(e.to_string()))?;
        self.authenticated = true;
        info!("Authenticated {}", self.identity);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn status(&mut self) -> Result<StatusSnapshot, DeviceError> {
        Ok(self.full_status()?.snapshot())
    }

    fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        self.request(&set_temperature_request(celsius))?;
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        self.request(&set_power_request(on, false))?;
        Ok(())
    }

    fn supports_clock(&self) -> bool {
        true
    }

    fn set_clock(&mut self, clock: DeviceClock) -> Result<(), DeviceError> {
        info!("Setting {} time", self.identity);
        self.request(&set_time_request(clock))?;
        Ok(())
    }

    fn set_deadzone(&mut self, deadzone: u8) -> Result<(), DeviceError> {
        info!("Setting {} deadzone", self.identity);
        let mut advanced = self.full_status()?.advanced;
        if advanced.dif == deadzone {
            debug!("{} already at deadzone {}", self.identity, deadzone);
            return Ok(());
        }
        advanced.dif = deadzone;
        self.request(&set_advanced_request(&advanced))?;
        Ok(())
    }
}
