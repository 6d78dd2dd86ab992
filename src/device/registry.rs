use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use super::identity::DeviceIdentity;
use super::lane::DeviceHandle;
use super::thermostat::{DeviceError, Thermostat};
use crate::error::BridgeError;

/// Identity → handle map built once at startup
///
/// Read-only afterwards; shared between the supervisor, the dispatcher and the
/// scheduler by clone.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    devices: HashMap<DeviceIdentity, DeviceHandle>,
}

impl Registry {
    /// Builds the registry from discovery results.
    ///
    /// Duplicate results for one physical unit collapse to the first one seen.
    /// Each remaining device is authenticated once, unless it already holds a
    /// session, and moved onto its lane; a device that fails authentication is
    /// logged and left out.
    pub async fn build(discovered: Vec<Box<dyn Thermostat>>) -> Result<Self, BridgeError> {
        if discovered.is_empty() {
            return Err(BridgeError::DiscoveryFailure);
        }

        let mut unique: HashMap<DeviceIdentity, Box<dyn Thermostat>> = HashMap::new();
        for device in discovered {
            let identity = device.identity();
            if unique.contains_key(&identity) {
                debug!("Ignoring duplicate discovery result for {}", identity);
                continue;
            }
            unique.insert(identity, device);
        }

        let mut devices = HashMap::new();
        for (identity, mut device) in unique {
            info!("Authenticating {}", identity);
            let authenticated = tokio::task::spawn_blocking(move || {
                if !device.is_authenticated() {
                    device.authenticate()?;
                }
                Ok::<_, DeviceError>(device)
            })
            .await;

            match authenticated {
                Ok(Ok(device)) => {
                    devices.insert(identity, DeviceHandle::spawn(device));
                }
                Ok(Err(e)) => {
                    error!("Skipping {}: {}", identity, e);
                }
                Err(e) => {
                    error!("Authentication task for {} failed: {}", identity, e);
                }
            }
        }

        if devices.is_empty() {
            warn!("No device passed authentication");
            return Err(BridgeError::NoAuthenticatedDevices);
        }

        info!("Registry ready with {} device(s)", devices.len());
        Ok(Self { devices })
    }

    pub fn from_handles(handles: impl IntoIterator<Item = DeviceHandle>) -> Self {
        let mut devices = HashMap::new();
        for handle in handles {
            devices
                .entry(handle.identity().clone())
                .or_insert(handle);
        }
        Self { devices }
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceHandle> {
        self.devices.get(device_id)
    }

    pub fn handles(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// One single-device registry per entry, used to give every device its own
    /// broker session.
    pub fn split_per_device(&self) -> Vec<Registry> {
        self.devices
            .values()
            .map(|handle| Registry::from_handles([handle.clone()]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeThermostat;

    const MAC_A: [u8; 6] = [0x34, 0xea, 0x34, 0x00, 0x00, 0x01];
    const MAC_B: [u8; 6] = [0x34, 0xea, 0x34, 0x00, 0x00, 0x02];

    #[tokio::test]
    async fn duplicate_discovery_results_collapse() {
        let first = FakeThermostat::new(MAC_A);
        let first_state = first.state();
        let duplicate = FakeThermostat::new(MAC_A);
        let duplicate_state = duplicate.state();

        let registry = Registry::build(vec![
            Box::new(first),
            Box::new(duplicate),
            Box::new(FakeThermostat::new(MAC_B)),
        ])
        .await
        .unwrap();

        assert_eq!(registry.len(), 2);
        // only one of the two results for the same unit was authenticated
        let auths = first_state.lock().unwrap().auth_attempts
            + duplicate_state.lock().unwrap().auth_attempts;
        assert_eq!(auths, 1);
    }

    #[tokio::test]
    async fn devices_with_a_session_are_not_authenticated_again() {
        let ready = FakeThermostat::authenticated(MAC_A);
        let ready_state = ready.state();

        let registry = Registry::build(vec![Box::new(ready)]).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(ready_state.lock().unwrap().auth_attempts, 0);
    }

    #[tokio::test]
    async fn empty_discovery_is_fatal() {
        let result = Registry::build(Vec::new()).await;
        assert!(matches!(result, Err(BridgeError::DiscoveryFailure)));
    }

    #[tokio::test]
    async fn devices_failing_authentication_are_skipped() {
        let rejecting = FakeThermostat::new(MAC_A).rejecting_auth();
        let registry = Registry::build(vec![
            Box::new(rejecting),
            Box::new(FakeThermostat::new(MAC_B)),
        ])
        .await
        .unwrap();

        assert_eq!(registry.len(), 1);
        let only = registry.handles().next().unwrap();
        assert_eq!(only.identity().mac(), MAC_B);
    }

    #[tokio::test]
    async fn all_devices_failing_authentication_is_fatal() {
        let result =
            Registry::build(vec![Box::new(FakeThermostat::new(MAC_A).rejecting_auth())]).await;
        assert!(matches!(result, Err(BridgeError::NoAuthenticatedDevices)));
    }

    #[tokio::test]
    async fn lookup_by_identity_string() {
        let registry = Registry::build(vec![Box::new(FakeThermostat::new(MAC_A))])
            .await
            .unwrap();
        assert!(registry
            .get("hysen_heating_controller_34ea34000001")
            .is_some());
        assert!(registry
            .get("hysen_heating_controller_34ea34000002")
            .is_none());
    }

    #[tokio::test]
    async fn split_gives_one_registry_per_device() {
        let registry = Registry::build(vec![
            Box::new(FakeThermostat::new(MAC_A)),
            Box::new(FakeThermostat::new(MAC_B)),
        ])
        .await
        .unwrap();
        let parts = registry.split_per_device();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|part| part.len() == 1));
    }
}
