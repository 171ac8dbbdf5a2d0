//! Property indices and external key tables
//!
//! The network stack pushes `(key, value)` pairs using its own string key
//! names. Each key is translated to a semantic [`PropertyIndex`] before any
//! typed field is touched, so the rest of the manager never dispatches on raw
//! strings. Keys that have no index are ignored for forward compatibility
//! with newer stack versions.

use super::device::DeviceKind;
use super::network::ConnectionKind;

/// Result of applying one property update to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The key mapped to a known semantic property.
    Handled(PropertyIndex),
    /// Unknown or unparseable key. Never an error.
    Ignored,
}

/// Semantic identity of a property, decoupled from the external key string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyIndex {
    // Common service properties.
    Name,
    Type,
    State,
    Error,
    Device,
    Profile,
    Priority,
    AutoConnect,
    SaveCredentials,
    Connectable,
    ProxyConfig,
    // Opaque service properties kept in the generic map.
    Mode,
    Strength,
    Frequency,
    Bssid,
    // Wifi.
    HexSsid,
    Security,
    Passphrase,
    PassphraseRequired,
    Identity,
    EapMethod,
    EapPhase2Auth,
    EapIdentity,
    EapAnonymousIdentity,
    EapPassphrase,
    EapCaCertNickname,
    EapClientCertId,
    EapUseSystemCas,
    // Cellular service.
    ActivationState,
    NetworkTechnology,
    RoamingState,
    Apn,
    LastGoodApn,
    UsageUrl,
    PaymentUrl,
    // VPN.
    ProviderType,
    ProviderHost,
    VpnUsername,
    VpnGroupName,
    // Device.
    Scanning,
    Carrier,
    FirmwareRevision,
    ModelId,
    PrlVersion,
    DataRoamingAllowed,
    SupportNetworkScan,
    SimLockStatus,
}

/// External key strings, mirroring the stack's service/device API names.
pub mod keys {
    pub const NAME: &str = "Name";
    pub const TYPE: &str = "Type";
    pub const STATE: &str = "State";
    pub const ERROR: &str = "Error";
    pub const DEVICE: &str = "Device";
    pub const PROFILE: &str = "Profile";
    pub const PRIORITY: &str = "Priority";
    pub const AUTO_CONNECT: &str = "AutoConnect";
    pub const SAVE_CREDENTIALS: &str = "SaveCredentials";
    pub const CONNECTABLE: &str = "Connectable";
    pub const PROXY_CONFIG: &str = "ProxyConfig";
    pub const MODE: &str = "Mode";
    pub const STRENGTH: &str = "Strength";
    pub const FREQUENCY: &str = "WiFi.Frequency";
    pub const BSSID: &str = "WiFi.BSSID";

    pub const HEX_SSID: &str = "WiFi.HexSSID";
    pub const SECURITY: &str = "Security";
    pub const PASSPHRASE: &str = "Passphrase";
    pub const PASSPHRASE_REQUIRED: &str = "PassphraseRequired";
    pub const IDENTITY: &str = "Identity";
    pub const EAP_METHOD: &str = "EAP.EAP";
    pub const EAP_PHASE_2_AUTH: &str = "EAP.InnerEAP";
    pub const EAP_IDENTITY: &str = "EAP.Identity";
    pub const EAP_ANONYMOUS_IDENTITY: &str = "EAP.AnonymousIdentity";
    pub const EAP_PASSWORD: &str = "EAP.Password";
    pub const EAP_CA_CERT_NICKNAME: &str = "EAP.CACertNSS";
    pub const EAP_CERT_ID: &str = "EAP.CertID";
    pub const EAP_KEY_ID: &str = "EAP.KeyID";
    pub const EAP_PIN: &str = "EAP.PIN";
    pub const EAP_USE_SYSTEM_CAS: &str = "EAP.UseSystemCAs";

    pub const ACTIVATION_STATE: &str = "Cellular.ActivationState";
    pub const NETWORK_TECHNOLOGY: &str = "Cellular.NetworkTechnology";
    pub const ROAMING_STATE: &str = "Cellular.RoamingState";
    pub const CELLULAR_APN: &str = "Cellular.APN";
    pub const CELLULAR_LAST_GOOD_APN: &str = "Cellular.LastGoodAPN";
    pub const USAGE_URL: &str = "Cellular.UsageUrl";
    pub const PAYMENT_URL: &str = "Cellular.PaymentUrl";

    pub const APN_APN: &str = "apn";
    pub const APN_NETWORK_ID: &str = "network_id";
    pub const APN_USERNAME: &str = "username";
    pub const APN_PASSWORD: &str = "password";
    pub const APN_NAME: &str = "name";
    pub const APN_LOCALIZED_NAME: &str = "localized_name";
    pub const APN_LANGUAGE: &str = "language";

    pub const PROVIDER_TYPE: &str = "Provider.Type";
    pub const PROVIDER_HOST: &str = "Provider.Host";
    pub const L2TP_IPSEC_USER: &str = "L2TPIPsec.User";
    pub const L2TP_IPSEC_PASSWORD: &str = "L2TPIPsec.Password";
    pub const L2TP_IPSEC_PSK: &str = "L2TPIPsec.PSK";
    pub const L2TP_IPSEC_GROUP_NAME: &str = "L2TPIPsec.GroupName";
    pub const L2TP_IPSEC_CLIENT_CERT_ID: &str = "L2TPIPsec.ClientCertID";
    pub const L2TP_IPSEC_CA_CERT_NICKNAME: &str = "L2TPIPsec.CACertNSS";
    pub const L2TP_IPSEC_PIN: &str = "L2TPIPsec.PIN";
    pub const OPEN_VPN_USER: &str = "OpenVPN.User";
    pub const OPEN_VPN_PASSWORD: &str = "OpenVPN.Password";
    pub const OPEN_VPN_OTP: &str = "OpenVPN.OTP";
    pub const OPEN_VPN_CLIENT_CERT_ID: &str = "OpenVPN.Pkcs11.ID";
    pub const OPEN_VPN_CA_CERT_NICKNAME: &str = "OpenVPN.CACertNSS";
    pub const OPEN_VPN_PIN: &str = "OpenVPN.Pkcs11.PIN";

    pub const SCANNING: &str = "Scanning";
    pub const CARRIER: &str = "Cellular.Carrier";
    pub const FIRMWARE_REVISION: &str = "Cellular.FirmwareRevision";
    pub const MODEL_ID: &str = "Cellular.ModelID";
    pub const PRL_VERSION: &str = "Cellular.PRLVersion";
    pub const ALLOW_ROAMING: &str = "Cellular.AllowRoaming";
    pub const SUPPORT_NETWORK_SCAN: &str = "Cellular.SupportNetworkScan";
    pub const SIM_LOCK_STATUS: &str = "Cellular.SIMLockStatus";

    pub const SIM_LOCK_TYPE: &str = "LockType";
    pub const SIM_LOCK_RETRIES_LEFT: &str = "RetriesLeft";
    pub const SIM_LOCK_ENABLED: &str = "LockEnabled";

    pub const SIM_LOCK_TYPE_PIN: &str = "sim-pin";
    pub const SIM_LOCK_TYPE_PUK: &str = "sim-puk";
}

fn common_service_index(key: &str) -> Option<PropertyIndex> {
    use PropertyIndex::*;
    match key {
        keys::NAME => Some(Name),
        keys::TYPE => Some(Type),
        keys::STATE => Some(State),
        keys::ERROR => Some(Error),
        keys::DEVICE => Some(Device),
        keys::PROFILE => Some(Profile),
        keys::PRIORITY => Some(Priority),
        keys::AUTO_CONNECT => Some(AutoConnect),
        keys::SAVE_CREDENTIALS => Some(SaveCredentials),
        keys::CONNECTABLE => Some(Connectable),
        keys::PROXY_CONFIG => Some(ProxyConfig),
        keys::MODE => Some(Mode),
        _ => None,
    }
}

fn wifi_index(key: &str) -> Option<PropertyIndex> {
    use PropertyIndex::*;
    match key {
        keys::HEX_SSID => Some(HexSsid),
        keys::SECURITY => Some(Security),
        keys::PASSPHRASE => Some(Passphrase),
        keys::PASSPHRASE_REQUIRED => Some(PassphraseRequired),
        keys::IDENTITY => Some(Identity),
        keys::EAP_METHOD => Some(EapMethod),
        keys::EAP_PHASE_2_AUTH => Some(EapPhase2Auth),
        keys::EAP_IDENTITY => Some(EapIdentity),
        keys::EAP_ANONYMOUS_IDENTITY => Some(EapAnonymousIdentity),
        keys::EAP_PASSWORD => Some(EapPassphrase),
        keys::EAP_CA_CERT_NICKNAME => Some(EapCaCertNickname),
        keys::EAP_CERT_ID => Some(EapClientCertId),
        keys::EAP_USE_SYSTEM_CAS => Some(EapUseSystemCas),
        keys::STRENGTH => Some(Strength),
        keys::FREQUENCY => Some(Frequency),
        keys::BSSID => Some(Bssid),
        _ => None,
    }
}

fn cellular_index(key: &str) -> Option<PropertyIndex> {
    use PropertyIndex::*;
    match key {
        keys::ACTIVATION_STATE => Some(ActivationState),
        keys::NETWORK_TECHNOLOGY => Some(NetworkTechnology),
        keys::ROAMING_STATE => Some(RoamingState),
        keys::CELLULAR_APN => Some(Apn),
        keys::CELLULAR_LAST_GOOD_APN => Some(LastGoodApn),
        keys::USAGE_URL => Some(UsageUrl),
        keys::PAYMENT_URL => Some(PaymentUrl),
        keys::STRENGTH => Some(Strength),
        _ => None,
    }
}

fn vpn_index(key: &str) -> Option<PropertyIndex> {
    use PropertyIndex::*;
    match key {
        keys::PROVIDER_TYPE => Some(ProviderType),
        keys::PROVIDER_HOST => Some(ProviderHost),
        keys::L2TP_IPSEC_USER | keys::OPEN_VPN_USER => Some(VpnUsername),
        keys::L2TP_IPSEC_GROUP_NAME => Some(VpnGroupName),
        _ => None,
    }
}

/// Translate a service property key for the given connection kind.
pub fn service_index(kind: ConnectionKind, key: &str) -> Option<PropertyIndex> {
    if let Some(index) = common_service_index(key) {
        return Some(index);
    }
    match kind {
        ConnectionKind::Ethernet => None,
        ConnectionKind::Wifi => wifi_index(key),
        ConnectionKind::Cellular => cellular_index(key),
        ConnectionKind::Vpn => vpn_index(key),
    }
}

/// Translate a device property key for the given device kind.
pub fn device_index(kind: DeviceKind, key: &str) -> Option<PropertyIndex> {
    use PropertyIndex::*;
    match key {
        keys::SCANNING => Some(Scanning),
        _ => match kind {
            DeviceKind::Cellular => match key {
                keys::CARRIER => Some(Carrier),
                keys::FIRMWARE_REVISION => Some(FirmwareRevision),
                keys::MODEL_ID => Some(ModelId),
                keys::PRL_VERSION => Some(PrlVersion),
                keys::ALLOW_ROAMING => Some(DataRoamingAllowed),
                keys::SUPPORT_NETWORK_SCAN => Some(SupportNetworkScan),
                keys::SIM_LOCK_STATUS => Some(SimLockStatus),
                _ => None,
            },
            _ => None,
        },
    }
}

/// True when a change to this property can alter the derived unique identity.
pub(crate) fn affects_identity(index: PropertyIndex) -> bool {
    matches!(
        index,
        PropertyIndex::Name
            | PropertyIndex::HexSsid
            | PropertyIndex::Security
            | PropertyIndex::ProviderType
            | PropertyIndex::ProviderHost
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_keys_resolve_for_every_kind() {
        for kind in [
            ConnectionKind::Ethernet,
            ConnectionKind::Wifi,
            ConnectionKind::Cellular,
            ConnectionKind::Vpn,
        ] {
            assert_eq!(service_index(kind, "Name"), Some(PropertyIndex::Name));
            assert_eq!(service_index(kind, "State"), Some(PropertyIndex::State));
        }
    }

    #[test]
    fn test_kind_specific_keys_do_not_leak() {
        assert_eq!(service_index(ConnectionKind::Ethernet, "Security"), None);
        assert_eq!(
            service_index(ConnectionKind::Wifi, "Cellular.ActivationState"),
            None
        );
        assert_eq!(service_index(ConnectionKind::Vpn, "WiFi.HexSSID"), None);
    }

    #[test]
    fn test_unknown_key_is_none() {
        assert_eq!(service_index(ConnectionKind::Wifi, "WiFi.FutureThing"), None);
        assert_eq!(device_index(DeviceKind::Wifi, "Cellular.Carrier"), None);
    }
}
