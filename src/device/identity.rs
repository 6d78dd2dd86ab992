use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable identity of one physical thermostat.
///
/// Built from the device type label and its hardware address, so the same unit
/// always maps to the same string regardless of discovery order. The string form
/// is `<type_lowercased_with_underscores>_<12 hex digit mac>` and is the key for
/// every topic and registry lookup.
#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    type_label: String,
    mac: [u8; 6],
    id: String,
}

impl DeviceIdentity {
    pub fn new(type_label: &str, mac: [u8; 6]) -> Self {
        let id = format!(
            "{}_{}",
            type_label.to_lowercase().replace(' ', "_"),
            mac_hex(&mac)
        );
        Self {
            type_label: type_label.to_string(),
            mac,
            id,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Hardware address as twelve lowercase hex digits
    pub fn mac_hex(&self) -> String {
        mac_hex(&self.mac)
    }

    /// Human readable name announced to the hub, e.g. `Hysen heating controller 34ea34b61d2c`
    pub fn display_name(&self) -> String {
        format!("{} {}", self.type_label, self.mac_hex())
    }
}

fn mac_hex(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02x}", b)).collect()
}

// Equality and hashing go through the id string only, which lets the registry
// be queried with a plain `&str` taken from a topic.
impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Borrow<str> for DeviceIdentity {
    fn borrow(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
