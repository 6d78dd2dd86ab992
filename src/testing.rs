//! In-memory doubles for device and broker, shared by the unit tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::QoS;

use crate::device::{DeviceClock, DeviceError, DeviceIdentity, StatusSnapshot, Thermostat};
use crate::mqtt::{Broker, MqttError};

pub const HYSEN_LABEL: &str = "Hysen heating controller";

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Status,
    SetTargetTemperature(f32),
    SetPower(bool),
    SetClock(DeviceClock),
    SetDeadzone(u8),
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<DeviceCall>,
    pub snapshot: StatusSnapshot,
    pub fail_status: bool,
    pub fail_commands: bool,
    pub reject_auth: bool,
    pub auth_attempts: usize,
    pub authenticated: bool,
    pub in_flight: usize,
    pub max_concurrent_calls: usize,
}

/// Thermostat that records calls and keeps its status in memory
pub struct FakeThermostat {
    identity: DeviceIdentity,
    supports_clock: bool,
    state: Arc<Mutex<FakeState>>,
}

impl FakeThermostat {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            identity: DeviceIdentity::new(HYSEN_LABEL, mac),
            supports_clock: true,
            state: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                snapshot: StatusSnapshot {
                    power: true,
                    active: false,
                    thermostat_temp: 20.0,
                    external_temp: 19.5,
                },
                fail_status: false,
                fail_commands: false,
                reject_auth: false,
                auth_attempts: 0,
                authenticated: false,
                in_flight: 0,
                max_concurrent_calls: 0,
            })),
        }
    }

    pub fn authenticated(mac: [u8; 6]) -> Self {
        let fake = Self::new(mac);
        fake.state.lock().unwrap().authenticated = true;
        fake
    }

    pub fn rejecting_auth(self) -> Self {
        self.state.lock().unwrap().reject_auth = true;
        self
    }

    pub fn without_clock(mut self) -> Self {
        self.supports_clock = false;
        self
    }

    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        self.state.clone()
    }

    /// Records the call and holds it open briefly so overlapping callers would show
    fn record<T>(
        &self,
        call: DeviceCall,
        apply: impl FnOnce(&mut FakeState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_concurrent_calls = state.max_concurrent_calls.max(state.in_flight);
            state.calls.push(call);
        }
        std::thread::sleep(Duration::from_millis(1));
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        apply(&mut state)
    }
}

impl Thermostat for FakeThermostat {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn authenticate(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.auth_attempts += 1;
        if state.reject_auth {
            return Err(DeviceError::Authentication("rejected".into()));
        }
        state.authenticated = true;
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.state.lock().unwrap().authenticated
    }

    fn status(&mut self) -> Result<StatusSnapshot, DeviceError> {
        self.record(DeviceCall::Status, |state| {
            if state.fail_status {
                Err(DeviceError::Io("timed out".into()))
            } else {
                Ok(state.snapshot)
            }
        })
    }

    fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        self.record(DeviceCall::SetTargetTemperature(celsius), |state| {
            if state.fail_commands {
                return Err(DeviceError::Io("timed out".into()));
            }
            state.snapshot.thermostat_temp = celsius;
            Ok(())
        })
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        self.record(DeviceCall::SetPower(on), |state| {
            if state.fail_commands {
                return Err(DeviceError::Io("timed out".into()));
            }
            state.snapshot.power = on;
            Ok(())
        })
    }

    fn supports_clock(&self) -> bool {
        self.supports_clock
    }

    fn set_clock(&mut self, clock: DeviceClock) -> Result<(), DeviceError> {
        if !self.supports_clock {
            return Err(DeviceError::Unsupported("clock"));
        }
        self.record(DeviceCall::SetClock(clock), |state| {
            if state.fail_commands {
                return Err(DeviceError::Io("timed out".into()));
            }
            Ok(())
        })
    }

    fn set_deadzone(&mut self, deadzone: u8) -> Result<(), DeviceError> {
        self.record(DeviceCall::SetDeadzone(deadzone), |state| {
            if state.fail_commands {
                return Err(DeviceError::Io("timed out".into()));
            }
            Ok(())
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl Published {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BrokerCall {
    Publish(Published),
    Subscribe { topic: String, qos: QoS },
}

/// Broker that records every request in order
#[derive(Clone, Debug, Default)]
pub struct RecordingBroker {
    log: Arc<Mutex<Vec<BrokerCall>>>,
}

impl RecordingBroker {
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.log.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Publish(published) => Some(published),
                BrokerCall::Subscribe { .. } => None,
            })
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|published| published.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe { topic, .. } => Some(topic),
                BrokerCall::Publish(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl Broker for RecordingBroker {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.log.lock().unwrap().push(BrokerCall::Publish(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        }));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.log.lock().unwrap().push(BrokerCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }
}
