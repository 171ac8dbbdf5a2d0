//! Network devices (ethernet adapters, wifi radios, cellular modems)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::property::{self, keys, Applied, PropertyIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Ethernet,
    Wifi,
    Cellular,
    Other,
}

impl DeviceKind {
    pub fn from_type_value(value: &str) -> Self {
        match value {
            "ethernet" => DeviceKind::Ethernet,
            "wifi" => DeviceKind::Wifi,
            "cellular" => DeviceKind::Cellular,
            _ => DeviceKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimLockState {
    #[default]
    Unknown,
    Unlocked,
    PinLocked,
    PukLocked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimPinRequired {
    #[default]
    Unknown,
    NotRequired,
    Required,
}

/// One physical (or virtual) network device, keyed by its stack path.
#[derive(Debug)]
pub struct NetworkDevice {
    device_path: String,
    kind: DeviceKind,
    scanning: bool,
    sim_lock_state: SimLockState,
    /// SIM unlock retries. `None` until a SIM-bearing device reports the
    /// real count; consumers must treat that as "unknown", never as a value.
    sim_retries_left: Option<u32>,
    sim_pin_required: SimPinRequired,
    prl_version: i64,
    carrier: String,
    firmware_revision: String,
    model_id: String,
    data_roaming_allowed: bool,
    support_network_scan: bool,
}

impl NetworkDevice {
    pub fn new(device_path: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_path: device_path.into(),
            kind,
            scanning: false,
            sim_lock_state: SimLockState::Unknown,
            sim_retries_left: None,
            sim_pin_required: SimPinRequired::Unknown,
            prl_version: 0,
            carrier: String::new(),
            firmware_revision: String::new(),
            model_id: String::new(),
            data_roaming_allowed: false,
            support_network_scan: false,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn scanning(&self) -> bool {
        self.scanning
    }

    pub fn sim_lock_state(&self) -> SimLockState {
        self.sim_lock_state
    }

    pub fn sim_retries_left(&self) -> Option<u32> {
        self.sim_retries_left
    }

    pub fn sim_pin_required(&self) -> SimPinRequired {
        self.sim_pin_required
    }

    pub fn prl_version(&self) -> i64 {
        self.prl_version
    }

    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    pub fn firmware_revision(&self) -> &str {
        &self.firmware_revision
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn data_roaming_allowed(&self) -> bool {
        self.data_roaming_allowed
    }

    pub fn support_network_scan(&self) -> bool {
        self.support_network_scan
    }

    /// Apply every entry of a full property dictionary.
    pub(crate) fn parse_info(&mut self, info: &serde_json::Map<String, Value>) -> bool {
        let mut changed = false;
        for (key, value) in info {
            let (_, entry_changed) = self.apply_property(key, value);
            changed |= entry_changed;
        }
        changed
    }

    /// Apply one property update. Unknown keys are ignored, never an error.
    pub(crate) fn apply_property(&mut self, key: &str, value: &Value) -> (Applied, bool) {
        let index = match property::device_index(self.kind, key) {
            Some(index) => index,
            None => return (Applied::Ignored, false),
        };
        let changed = match index {
            PropertyIndex::Scanning => {
                let Some(scanning) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.scanning, scanning)
            }
            PropertyIndex::Carrier => {
                let Some(carrier) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.carrier, carrier.to_string())
            }
            PropertyIndex::FirmwareRevision => {
                let Some(rev) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.firmware_revision, rev.to_string())
            }
            PropertyIndex::ModelId => {
                let Some(model) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.model_id, model.to_string())
            }
            PropertyIndex::PrlVersion => {
                let Some(version) = value.as_i64() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.prl_version, version)
            }
            PropertyIndex::DataRoamingAllowed => {
                let Some(allowed) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.data_roaming_allowed, allowed)
            }
            PropertyIndex::SupportNetworkScan => {
                let Some(support) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.support_network_scan, support)
            }
            PropertyIndex::SimLockStatus => {
                let Some(status) = value.as_object() else {
                    return (Applied::Ignored, false);
                };
                self.apply_sim_lock_status(status)
            }
            _ => return (Applied::Ignored, false),
        };
        (Applied::Handled(index), changed)
    }

    fn apply_sim_lock_status(&mut self, status: &serde_json::Map<String, Value>) -> bool {
        let mut changed = false;
        if let Some(lock_type) = status.get(keys::SIM_LOCK_TYPE).and_then(Value::as_str) {
            let state = match lock_type {
                keys::SIM_LOCK_TYPE_PIN => SimLockState::PinLocked,
                keys::SIM_LOCK_TYPE_PUK => SimLockState::PukLocked,
                "" => SimLockState::Unlocked,
                other => {
                    tracing::warn!(path = %self.device_path, lock_type = %other,
                        "Unrecognized SIM lock type");
                    SimLockState::Unknown
                }
            };
            changed |= assign(&mut self.sim_lock_state, state);
        }
        if let Some(retries) = status.get(keys::SIM_LOCK_RETRIES_LEFT).and_then(Value::as_u64) {
            changed |= assign(&mut self.sim_retries_left, Some(retries as u32));
        }
        if let Some(enabled) = status.get(keys::SIM_LOCK_ENABLED).and_then(Value::as_bool) {
            let required = if enabled {
                SimPinRequired::Required
            } else {
                SimPinRequired::NotRequired
            };
            changed |= assign(&mut self.sim_pin_required, required);
        }
        changed
    }
}

pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retries_unknown_until_reported() {
        let mut device = NetworkDevice::new("/device/cellular1", DeviceKind::Cellular);
        assert_eq!(device.sim_retries_left(), None);

        let status = json!({ "LockType": "sim-pin", "RetriesLeft": 3, "LockEnabled": true });
        let (applied, changed) = device.apply_property("Cellular.SIMLockStatus", &status);
        assert_eq!(applied, Applied::Handled(PropertyIndex::SimLockStatus));
        assert!(changed);
        assert_eq!(device.sim_retries_left(), Some(3));
        assert_eq!(device.sim_lock_state(), SimLockState::PinLocked);
        assert_eq!(device.sim_pin_required(), SimPinRequired::Required);
    }

    #[test]
    fn test_zero_retries_is_a_real_value() {
        let mut device = NetworkDevice::new("/device/cellular1", DeviceKind::Cellular);
        let status = json!({ "LockType": "sim-puk", "RetriesLeft": 0 });
        device.apply_property("Cellular.SIMLockStatus", &status);
        assert_eq!(device.sim_retries_left(), Some(0));
        assert_eq!(device.sim_lock_state(), SimLockState::PukLocked);
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        let mut device = NetworkDevice::new("/device/wifi1", DeviceKind::Wifi);
        let before = format!("{:?}", device);
        let (applied, changed) = device.apply_property("Cellular.FutureProperty", &json!(7));
        assert_eq!(applied, Applied::Ignored);
        assert!(!changed);
        assert_eq!(format!("{:?}", device), before);
    }

    #[test]
    fn test_cellular_keys_rejected_on_wifi_device() {
        let mut device = NetworkDevice::new("/device/wifi1", DeviceKind::Wifi);
        let (applied, _) = device.apply_property("Cellular.Carrier", &json!("Carrier X"));
        assert_eq!(applied, Applied::Ignored);
    }

    #[test]
    fn test_parse_info_applies_all_entries() {
        let mut device = NetworkDevice::new("/device/cellular1", DeviceKind::Cellular);
        let info = json!({
            "Scanning": true,
            "Cellular.Carrier": "Carrier X",
            "Cellular.PRLVersion": 5,
            "Cellular.AllowRoaming": true,
            "SomethingNew": "ignored",
        });
        assert!(device.parse_info(info.as_object().unwrap()));
        assert!(device.scanning());
        assert_eq!(device.carrier(), "Carrier X");
        assert_eq!(device.prl_version(), 5);
        assert!(device.data_roaming_allowed());
    }
}
