//! Interfaces to the underlying network stack
//!
//! The manager never talks to a transport directly. Outbound property writes
//! go through a [`PropertySink`], and IP assignments are read back through an
//! [`IpConfigQuery`]. Both are trait objects so tests and the demo can run
//! against in-process stubs.

use serde_json::Value;

/// Outbound property channel to the stack.
///
/// Every user-facing setter funnels through this before updating its local
/// typed field. When the sink reports not ready, mutating operations become
/// silent no-ops ("best effort" semantics for a live device model).
pub trait PropertySink: Send + Sync {
    /// Whether the transport is currently usable.
    fn ready(&self) -> bool;

    fn set_property(&self, service_path: &str, key: &str, value: Value);

    fn clear_property(&self, service_path: &str, key: &str);

    /// Ask the stack to begin cellular activation for a service. Returns
    /// whether the request was accepted for submission.
    fn request_activation(&self, service_path: &str) -> bool;
}

/// Read-back of the current IP assignment for a device.
///
/// Modeled as a synchronous call on the control thread; the state machine
/// invokes it on every transition into a non-failure state so the refreshed
/// address is visible before any observer fires.
pub trait IpConfigQuery: Send + Sync {
    fn current_config(&self, device_path: &str) -> Option<IpConfig>;
}

/// One IP assignment as reported by the stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpConfig {
    pub address: String,
    pub netmask: String,
    pub gateway: String,
    pub name_servers: String,
}

impl IpConfig {
    /// Convert the dotted-quad netmask to a CIDR prefix length.
    ///
    /// Returns `None` for malformed masks, including non-contiguous ones
    /// such as `255.224.255.0`.
    pub fn prefix_length(&self) -> Option<u8> {
        let mut prefix: u32 = 0;
        let mut count: u32 = 0;
        for token in self.netmask.split('.') {
            if count == 4 {
                return None;
            }
            if prefix / 8 != count {
                // A partial octet was already seen; everything after it must
                // be zero.
                if token != "0" {
                    return None;
                }
            } else {
                prefix += match token {
                    "255" => 8,
                    "254" => 7,
                    "252" => 6,
                    "248" => 5,
                    "240" => 4,
                    "224" => 3,
                    "192" => 2,
                    "128" => 1,
                    "0" => 0,
                    _ => return None,
                };
            }
            count += 1;
        }
        if count < 4 {
            return None;
        }
        Some(prefix as u8)
    }
}

/// Convenience guard used at the entry of every mutating operation.
pub(crate) fn sink_ready(sink: &dyn PropertySink, service_path: &str) -> bool {
    if sink.ready() {
        true
    } else {
        tracing::debug!(path = %service_path, "Property sink not ready, dropping write");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(netmask: &str) -> IpConfig {
        IpConfig {
            address: "10.0.0.2".to_string(),
            netmask: netmask.to_string(),
            gateway: "10.0.0.1".to_string(),
            name_servers: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_prefix_length_common_masks() {
        assert_eq!(mask("255.255.255.0").prefix_length(), Some(24));
        assert_eq!(mask("255.255.0.0").prefix_length(), Some(16));
        assert_eq!(mask("255.255.255.255").prefix_length(), Some(32));
        assert_eq!(mask("0.0.0.0").prefix_length(), Some(0));
        assert_eq!(mask("255.255.240.0").prefix_length(), Some(20));
    }

    #[test]
    fn test_prefix_length_rejects_malformed_masks() {
        assert_eq!(mask("255.224.255.0").prefix_length(), None);
        assert_eq!(mask("255.255.255").prefix_length(), None);
        assert_eq!(mask("255.255.255.0.0").prefix_length(), None);
        assert_eq!(mask("255.255.banana.0").prefix_length(), None);
        assert_eq!(mask("").prefix_length(), None);
    }
}
