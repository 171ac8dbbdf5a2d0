//! Network services and the connection state machine
//!
//! A [`Network`] is one service tracked by the manager: shared fields plus a
//! kind-specific payload (ethernet, wifi, cellular, vpn). Inbound property
//! updates from the stack land in [`Network::apply_property`]; user-initiated
//! changes go out through the property sink first and update the local typed
//! field optimistically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::assign;
use super::cellular::{ActivationState, CellularApn, CellularConfig};
use super::certs::{CertificatePattern, CertificateStore, ClientCertMode, EnrollmentHandler, ResolveTicket};
use super::plan::{CellularDataPlan, PlanThresholds};
use super::property::{self, keys, Applied, PropertyIndex};
use super::transport::{sink_ready, IpConfig, IpConfigQuery, PropertySink};
use super::vpn::VpnConfig;
use super::wifi::{EapMethod, EapPhase2Auth, WifiConfig};

/// Priority value written when a service is marked preferred.
const PRIORITY_PREFERRED: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    Ethernet,
    Wifi,
    Cellular,
    Vpn,
}

impl ConnectionKind {
    pub fn from_type_value(value: &str) -> Option<Self> {
        match value {
            "ethernet" => Some(ConnectionKind::Ethernet),
            "wifi" => Some(ConnectionKind::Wifi),
            "cellular" => Some(ConnectionKind::Cellular),
            "vpn" => Some(ConnectionKind::Vpn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::Ethernet => "ethernet",
            ConnectionKind::Wifi => "wifi",
            ConnectionKind::Cellular => "cellular",
            ConnectionKind::Vpn => "vpn",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Idle,
    Carrier,
    Association,
    Configuration,
    Ready,
    Disconnect,
    Failure,
    ActivationFailure,
    Portal,
    Online,
}

impl ConnectionState {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(ConnectionState::Idle),
            "carrier" => Some(ConnectionState::Carrier),
            "association" => Some(ConnectionState::Association),
            "configuration" => Some(ConnectionState::Configuration),
            "ready" => Some(ConnectionState::Ready),
            "disconnect" => Some(ConnectionState::Disconnect),
            "failure" => Some(ConnectionState::Failure),
            "activation-failure" => Some(ConnectionState::ActivationFailure),
            "portal" => Some(ConnectionState::Portal),
            "online" => Some(ConnectionState::Online),
            _ => None,
        }
    }

    /// States during which a connection attempt is still being negotiated.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Carrier | ConnectionState::Association | ConnectionState::Configuration
        )
    }

    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Ready | ConnectionState::Portal | ConnectionState::Online
        )
    }

    /// States that end a connection attempt for bookkeeping purposes.
    pub fn ends_connection_attempt(self) -> bool {
        matches!(
            self,
            ConnectionState::Ready
                | ConnectionState::Online
                | ConnectionState::Failure
                | ConnectionState::ActivationFailure
        )
    }
}

/// Last error reported for a service. Stored as data, never thrown; the
/// `Display` form is for diagnostics, user-facing text is a localization
/// layer's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConnectionError {
    #[error("unknown error")]
    Unknown,
    #[error("out of range")]
    OutOfRange,
    #[error("PIN missing")]
    PinMissing,
    #[error("DHCP failed")]
    DhcpFailed,
    #[error("connect failed")]
    ConnectFailed,
    #[error("bad passphrase")]
    BadPassphrase,
    #[error("bad WEP key")]
    BadWepKey,
    #[error("activation failed")]
    ActivationFailed,
    #[error("need EVDO")]
    NeedEvdo,
    #[error("need home network")]
    NeedHomeNetwork,
    #[error("OTASP failed")]
    OtaspFailed,
    #[error("AAA check failed")]
    AaaFailed,
    #[error("internal error")]
    Internal,
    #[error("DNS lookup failed")]
    DnsLookupFailed,
    #[error("HTTP get failed")]
    HttpGetFailed,
    #[error("IPsec PSK auth failed")]
    IpsecPskAuthFailed,
    #[error("IPsec certificate auth failed")]
    IpsecCertAuthFailed,
    #[error("PPP auth failed")]
    PppAuthFailed,
}

impl ConnectionError {
    /// Maps a stack error value. Unrecognized non-empty values collapse to
    /// `Unknown` so retry logic never sees a failure without an error.
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "" => None,
            "out-of-range" => Some(ConnectionError::OutOfRange),
            "pin-missing" => Some(ConnectionError::PinMissing),
            "dhcp-failed" => Some(ConnectionError::DhcpFailed),
            "connect-failed" => Some(ConnectionError::ConnectFailed),
            "bad-passphrase" => Some(ConnectionError::BadPassphrase),
            "bad-wepkey" => Some(ConnectionError::BadWepKey),
            "activation-failed" => Some(ConnectionError::ActivationFailed),
            "need-evdo" => Some(ConnectionError::NeedEvdo),
            "need-home-network" => Some(ConnectionError::NeedHomeNetwork),
            "otasp-failed" => Some(ConnectionError::OtaspFailed),
            "aaa-failed" => Some(ConnectionError::AaaFailed),
            "internal-error" => Some(ConnectionError::Internal),
            "dns-lookup-failed" => Some(ConnectionError::DnsLookupFailed),
            "http-get-failed" => Some(ConnectionError::HttpGetFailed),
            "ipsec-psk-auth-failed" => Some(ConnectionError::IpsecPskAuthFailed),
            "ipsec-cert-auth-failed" => Some(ConnectionError::IpsecCertAuthFailed),
            "ppp-auth-failed" => Some(ConnectionError::PppAuthFailed),
            _ => Some(ConnectionError::Unknown),
        }
    }
}

/// Kind-specific payload.
#[derive(Debug)]
pub enum Variant {
    Ethernet,
    Wifi(WifiConfig),
    Cellular(CellularConfig),
    Vpn(VpnConfig),
}

/// One network service.
#[derive(Debug)]
pub struct Network {
    service_path: String,
    kind: ConnectionKind,
    name: String,
    unique_id: String,
    state: ConnectionState,
    error: Option<ConnectionError>,
    connectable: bool,
    connection_started: bool,
    notify_failure: bool,
    priority: Option<i32>,
    auto_connect: bool,
    save_credentials: bool,
    profile_path: String,
    device_path: String,
    ip_config: Option<IpConfig>,
    proxy_config: String,
    property_map: BTreeMap<PropertyIndex, Value>,
    variant: Variant,
}

impl Network {
    pub fn new(service_path: impl Into<String>, kind: ConnectionKind) -> Self {
        let variant = match kind {
            ConnectionKind::Ethernet => Variant::Ethernet,
            ConnectionKind::Wifi => Variant::Wifi(WifiConfig::new()),
            ConnectionKind::Cellular => Variant::Cellular(CellularConfig::new()),
            ConnectionKind::Vpn => Variant::Vpn(VpnConfig::new()),
        };
        let mut network = Self {
            service_path: service_path.into(),
            kind,
            name: String::new(),
            unique_id: String::new(),
            state: ConnectionState::Unknown,
            error: None,
            connectable: true,
            connection_started: false,
            notify_failure: false,
            priority: None,
            auto_connect: false,
            save_credentials: false,
            profile_path: String::new(),
            device_path: String::new(),
            ip_config: None,
            proxy_config: String::new(),
            property_map: BTreeMap::new(),
            variant,
        };
        network.calculate_unique_id();
        network
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.error
    }

    pub fn connectable(&self) -> bool {
        self.connectable
    }

    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn connecting(&self) -> bool {
        self.state.is_connecting()
    }

    pub fn connection_started(&self) -> bool {
        self.connection_started
    }

    /// Whether a user-initiated attempt is still outstanding.
    pub fn connection_attempt_in_progress(&self) -> bool {
        self.connection_started && !self.state.ends_connection_attempt()
    }

    /// Set when a transition into `Failure` still has to be surfaced to the
    /// user. Cleared by the consumer once shown.
    pub fn notify_failure(&self) -> bool {
        self.notify_failure
    }

    pub fn clear_notify_failure(&mut self) {
        self.notify_failure = false;
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    pub fn save_credentials(&self) -> bool {
        self.save_credentials
    }

    pub fn profile_path(&self) -> &str {
        &self.profile_path
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn ip_config(&self) -> Option<&IpConfig> {
        self.ip_config.as_ref()
    }

    pub fn proxy_config(&self) -> &str {
        &self.proxy_config
    }

    pub fn wifi(&self) -> Option<&WifiConfig> {
        match &self.variant {
            Variant::Wifi(wifi) => Some(wifi),
            _ => None,
        }
    }

    pub fn wifi_mut(&mut self) -> Option<&mut WifiConfig> {
        match &mut self.variant {
            Variant::Wifi(wifi) => Some(wifi),
            _ => None,
        }
    }

    pub fn cellular(&self) -> Option<&CellularConfig> {
        match &self.variant {
            Variant::Cellular(cellular) => Some(cellular),
            _ => None,
        }
    }

    pub fn cellular_mut(&mut self) -> Option<&mut CellularConfig> {
        match &mut self.variant {
            Variant::Cellular(cellular) => Some(cellular),
            _ => None,
        }
    }

    pub fn vpn(&self) -> Option<&VpnConfig> {
        match &self.variant {
            Variant::Vpn(vpn) => Some(vpn),
            _ => None,
        }
    }

    pub fn vpn_mut(&mut self) -> Option<&mut VpnConfig> {
        match &mut self.variant {
            Variant::Vpn(vpn) => Some(vpn),
            _ => None,
        }
    }

    /// Generic property map lookup, for fields without a dedicated typed
    /// slot. Typed fields always win; they are never mirrored here.
    pub fn property(&self, index: PropertyIndex) -> Option<&Value> {
        self.property_map.get(&index)
    }

    pub(crate) fn update_property_map(&mut self, index: PropertyIndex, value: &Value) -> bool {
        if value.is_null() {
            return self.property_map.remove(&index).is_some();
        }
        match self.property_map.get(&index) {
            Some(existing) if existing == value => false,
            _ => {
                self.property_map.insert(index, value.clone());
                true
            }
        }
    }

    /// Drive the connection state machine. Setting the current state again
    /// is a no-op with no side effects. Returns whether the state changed.
    pub(crate) fn set_state(
        &mut self,
        new_state: ConnectionState,
        ip_query: &dyn IpConfigQuery,
    ) -> bool {
        if new_state == self.state {
            return false;
        }
        let old_state = self.state;
        self.state = new_state;
        if !new_state.is_connecting() {
            self.connection_started = false;
        }
        if new_state == ConnectionState::Failure {
            if old_state != ConnectionState::Unknown && old_state != ConnectionState::Idle {
                // A new failure the user has not seen yet. Idle -> Failure
                // happens on resume while the device is not ready and is not
                // a real failure.
                self.notify_failure = true;
                if self.error.is_none() {
                    // Retry logic depends on a non-empty error.
                    self.error = Some(ConnectionError::Unknown);
                }
            }
        } else {
            // The address must be current before any observer hears about
            // the new state.
            self.refresh_ip_config(ip_query);
        }
        tracing::debug!(
            name = %self.name,
            old_state = ?old_state,
            new_state = ?new_state,
            "Service state changed"
        );
        true
    }

    pub(crate) fn refresh_ip_config(&mut self, ip_query: &dyn IpConfigQuery) {
        self.ip_config = None;
        if self.connected() && !self.device_path.is_empty() {
            self.ip_config = ip_query.current_config(&self.device_path);
        }
    }

    /// Recompute the derived unique identity from current field state.
    /// Callers that index by identity must re-index after any change to an
    /// identity-affecting field.
    pub(crate) fn calculate_unique_id(&mut self) {
        self.unique_id = match &self.variant {
            Variant::Ethernet | Variant::Cellular(_) => self.name.clone(),
            Variant::Wifi(wifi) => {
                format!("{}|{}", wifi.encryption().for_identity().as_str(), self.name)
            }
            Variant::Vpn(vpn) => {
                format!("{}|{}", vpn.provider_type().as_str(), vpn.server_hostname())
            }
        };
    }

    /// Overwrite and clear every credential field of this service. Invoked
    /// on logout, profile removal and "forget network"; idempotent.
    pub fn erase_credentials(&mut self) {
        match &mut self.variant {
            Variant::Wifi(wifi) => wifi.erase_credentials(),
            Variant::Vpn(vpn) => vpn.erase_credentials(),
            Variant::Ethernet | Variant::Cellular(_) => {}
        }
    }

    /// Apply one inbound property update. Returns whether the key was
    /// handled and whether any observable field actually changed.
    pub(crate) fn apply_property(
        &mut self,
        key: &str,
        value: &Value,
        ip_query: &dyn IpConfigQuery,
    ) -> (Applied, bool) {
        let index = match property::service_index(self.kind, key) {
            Some(index) => index,
            None => return (Applied::Ignored, false),
        };
        let changed = match index {
            PropertyIndex::Name => {
                let Some(name) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.name, sanitized_name(name))
            }
            PropertyIndex::HexSsid => {
                let Some(hex_ssid) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                let Ok(raw) = hex::decode(hex_ssid) else {
                    tracing::warn!(path = %self.service_path, "Illegal hex digit in WiFi.HexSSID");
                    return (Applied::Ignored, false);
                };
                let ssid = String::from_utf8(raw.clone())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&raw).into_owned());
                assign(&mut self.name, sanitized_name(&ssid))
            }
            PropertyIndex::Type => {
                let Some(kind) = value.as_str().and_then(ConnectionKind::from_type_value) else {
                    return (Applied::Ignored, false);
                };
                if kind != self.kind {
                    tracing::warn!(
                        path = %self.service_path,
                        reported = kind.as_str(),
                        "Service type changed after creation; keeping original"
                    );
                }
                false
            }
            PropertyIndex::State => {
                let Some(state) = value.as_str().and_then(ConnectionState::from_value) else {
                    return (Applied::Ignored, false);
                };
                self.set_state(state, ip_query)
            }
            PropertyIndex::Error => {
                let Some(error) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.error, ConnectionError::from_value(error))
            }
            PropertyIndex::Device => {
                let Some(device) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.device_path, device.to_string())
            }
            PropertyIndex::Profile => {
                let Some(profile) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.profile_path, profile.to_string())
            }
            PropertyIndex::Priority => {
                let Some(priority) = value.as_i64() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.priority, Some(priority as i32))
            }
            PropertyIndex::AutoConnect => {
                let Some(auto_connect) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.auto_connect, auto_connect)
            }
            PropertyIndex::SaveCredentials => {
                let Some(save) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.save_credentials, save)
            }
            PropertyIndex::Connectable => {
                let Some(connectable) = value.as_bool() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.connectable, connectable)
            }
            PropertyIndex::ProxyConfig => {
                let Some(proxy) = value.as_str() else {
                    return (Applied::Ignored, false);
                };
                assign(&mut self.proxy_config, proxy.to_string())
            }
            PropertyIndex::Mode
            | PropertyIndex::Strength
            | PropertyIndex::Frequency
            | PropertyIndex::Bssid
            | PropertyIndex::LastGoodApn => self.update_property_map(index, value),
            _ => {
                let applied = match &mut self.variant {
                    Variant::Ethernet => None,
                    Variant::Wifi(wifi) => wifi.apply(index, value),
                    Variant::Cellular(cellular) => cellular.apply(index, value),
                    Variant::Vpn(vpn) => vpn.apply(index, value),
                };
                match applied {
                    Some(changed) => changed,
                    None => return (Applied::Ignored, false),
                }
            }
        };
        if changed && property::affects_identity(index) {
            self.calculate_unique_id();
        }
        (Applied::Handled(index), changed)
    }

    /// Apply every entry of a full property dictionary.
    pub(crate) fn parse_info(
        &mut self,
        info: &serde_json::Map<String, Value>,
        ip_query: &dyn IpConfigQuery,
    ) -> bool {
        let mut changed = false;
        for (key, value) in info {
            let (_, entry_changed) = self.apply_property(key, value, ip_query);
            changed |= entry_changed;
        }
        changed
    }

    // ---- User-initiated setters. Each funnels the write through the sink
    // before optimistically updating the local typed field; a sink that is
    // not ready turns the whole operation into a no-op.

    pub fn set_preferred(&mut self, sink: &dyn PropertySink, preferred: bool) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        if preferred {
            write_int(sink, &self.service_path, keys::PRIORITY, PRIORITY_PREFERRED);
            self.priority = Some(PRIORITY_PREFERRED as i32);
        } else {
            sink.clear_property(&self.service_path, keys::PRIORITY);
            self.priority = None;
        }
    }

    pub fn set_auto_connect(&mut self, sink: &dyn PropertySink, auto_connect: bool) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        write_bool(sink, &self.service_path, keys::AUTO_CONNECT, auto_connect);
        self.auto_connect = auto_connect;
    }

    pub fn set_save_credentials(&mut self, sink: &dyn PropertySink, save: bool) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        write_bool(sink, &self.service_path, keys::SAVE_CREDENTIALS, save);
        self.save_credentials = save;
    }

    pub fn set_profile_path(&mut self, sink: &dyn PropertySink, profile_path: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        tracing::debug!(name = %self.name, profile = %profile_path, "Setting service profile");
        write_or_clear_string(sink, &self.service_path, keys::PROFILE, profile_path);
        self.profile_path = profile_path.to_string();
    }

    pub fn set_proxy_config(&mut self, sink: &dyn PropertySink, proxy_config: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        write_or_clear_string(sink, &self.service_path, keys::PROXY_CONFIG, proxy_config);
        self.proxy_config = proxy_config.to_string();
    }

    // ---- Wifi setters.

    /// Update the wifi passphrase. An empty value clears the stack property
    /// and restores the locally remembered passphrase.
    pub fn set_passphrase(&mut self, sink: &dyn PropertySink, passphrase: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::PASSPHRASE, passphrase);
        wifi.set_passphrase_local(passphrase);
    }

    pub fn set_identity(&mut self, sink: &dyn PropertySink, identity: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_string(sink, &self.service_path, keys::IDENTITY, identity);
        wifi.identity = identity.to_string();
    }

    pub fn set_eap_method(&mut self, sink: &dyn PropertySink, method: EapMethod) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        wifi.eap_method = method;
        match method {
            EapMethod::Unknown => sink.clear_property(&self.service_path, keys::EAP_METHOD),
            _ => write_string(sink, &self.service_path, keys::EAP_METHOD, method.as_str()),
        }
    }

    pub fn set_eap_phase_2_auth(&mut self, sink: &dyn PropertySink, auth: EapPhase2Auth) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        wifi.eap_phase_2_auth = auth;
        match auth.sink_value(wifi.eap_method) {
            Some(value) => write_string(sink, &self.service_path, keys::EAP_PHASE_2_AUTH, &value),
            None => sink.clear_property(&self.service_path, keys::EAP_PHASE_2_AUTH),
        }
    }

    pub fn set_eap_ca_cert_nickname(&mut self, sink: &dyn PropertySink, nickname: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::EAP_CA_CERT_NICKNAME, nickname);
        wifi.eap_ca_cert_nickname = nickname.to_string();
    }

    /// The stack requires both CertID and KeyID for TLS connections, even
    /// though by convention they carry the same identifier.
    pub fn set_eap_client_cert_id(&mut self, sink: &dyn PropertySink, pkcs11_id: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::EAP_CERT_ID, pkcs11_id);
        write_or_clear_string(sink, &self.service_path, keys::EAP_KEY_ID, pkcs11_id);
        wifi.eap_client_cert_id.assign(pkcs11_id);
    }

    pub fn set_eap_use_system_cas(&mut self, sink: &dyn PropertySink, use_system_cas: bool) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_bool(sink, &self.service_path, keys::EAP_USE_SYSTEM_CAS, use_system_cas);
        wifi.eap_use_system_cas = use_system_cas;
    }

    pub fn set_eap_identity(&mut self, sink: &dyn PropertySink, identity: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::EAP_IDENTITY, identity);
        wifi.eap_identity.assign(identity);
    }

    pub fn set_eap_anonymous_identity(&mut self, sink: &dyn PropertySink, identity: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::EAP_ANONYMOUS_IDENTITY, identity);
        wifi.eap_anonymous_identity.assign(identity);
    }

    pub fn set_eap_passphrase(&mut self, sink: &dyn PropertySink, passphrase: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Wifi(wifi) = &mut self.variant else {
            return;
        };
        write_or_clear_string(sink, &self.service_path, keys::EAP_PASSWORD, passphrase);
        wifi.eap_passphrase.assign(passphrase);
    }

    /// Set or clear the smartcard PIN used to unlock the client
    /// certificate's key store. The PIN goes to the stack only; it is never
    /// stored locally.
    pub fn set_certificate_pin(&mut self, sink: &dyn PropertySink, pin: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let key = match &self.variant {
            Variant::Wifi(_) => keys::EAP_PIN,
            Variant::Vpn(vpn) => match vpn.provider_type() {
                super::vpn::VpnProviderType::OpenVpn => keys::OPEN_VPN_PIN,
                _ => keys::L2TP_IPSEC_PIN,
            },
            _ => return,
        };
        write_or_clear_string(sink, &self.service_path, key, pin);
    }

    /// Whether a connection attempt needs a passphrase the model does not
    /// currently have.
    pub fn passphrase_required(&self) -> bool {
        match &self.variant {
            Variant::Wifi(wifi) => wifi.is_passphrase_required(self.error, self.connectable),
            _ => false,
        }
    }

    // ---- Cellular setters.

    /// Ask the stack to activate this cellular service. On accepted
    /// submission the local state optimistically becomes `Activating`, so an
    /// unrelated status message arriving in between cannot be misread as
    /// "not activating"; the stack's own notifications are authoritative
    /// from then on.
    pub fn start_activation(&mut self, sink: &dyn PropertySink) -> bool {
        if !sink_ready(sink, &self.service_path) {
            return false;
        }
        let Variant::Cellular(cellular) = &mut self.variant else {
            return false;
        };
        if !sink.request_activation(&self.service_path) {
            tracing::warn!(path = %self.service_path, "Stack rejected activation request");
            return false;
        }
        cellular.activation_state = ActivationState::Activating;
        true
    }

    /// Configure the APN. An empty APN clears the stack property.
    pub fn set_apn(&mut self, sink: &dyn PropertySink, apn: &CellularApn) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Cellular(cellular) = &mut self.variant else {
            return;
        };
        if apn.apn.is_empty() {
            sink.clear_property(&self.service_path, keys::CELLULAR_APN);
        } else {
            sink.set_property(&self.service_path, keys::CELLULAR_APN, apn.to_connect_dict());
        }
        cellular.apn = apn.clone();
    }

    /// Replace the cached carrier data plans and recompute warning levels.
    pub fn update_data_plans(
        &mut self,
        plans: Vec<CellularDataPlan>,
        now: chrono::DateTime<chrono::Utc>,
        thresholds: &PlanThresholds,
    ) {
        if let Variant::Cellular(cellular) = &mut self.variant {
            cellular.update_data_plans(plans, now, thresholds);
        }
    }

    // ---- VPN setters.

    pub fn set_vpn_ca_cert_nickname(&mut self, sink: &dyn PropertySink, nickname: &str) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Vpn(vpn) = &mut self.variant else {
            return;
        };
        let key = match vpn.provider_type() {
            super::vpn::VpnProviderType::OpenVpn => keys::OPEN_VPN_CA_CERT_NICKNAME,
            _ => keys::L2TP_IPSEC_CA_CERT_NICKNAME,
        };
        write_string(sink, &self.service_path, key, nickname);
        vpn.ca_cert_nickname.assign(nickname);
    }

    pub fn set_vpn_psk_credentials(
        &mut self,
        sink: &dyn PropertySink,
        psk_passphrase: &str,
        username: &str,
        user_passphrase: &str,
        group_name: &str,
    ) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Vpn(vpn) = &mut self.variant else {
            return;
        };
        if !psk_passphrase.is_empty() {
            write_string(sink, &self.service_path, keys::L2TP_IPSEC_PSK, psk_passphrase);
            vpn.psk_passphrase.assign(psk_passphrase);
        }
        write_string(sink, &self.service_path, keys::L2TP_IPSEC_USER, username);
        vpn.username = username.to_string();
        if !user_passphrase.is_empty() {
            write_string(sink, &self.service_path, keys::L2TP_IPSEC_PASSWORD, user_passphrase);
            vpn.user_passphrase.assign(user_passphrase);
        }
        write_string(sink, &self.service_path, keys::L2TP_IPSEC_GROUP_NAME, group_name);
        vpn.group_name = group_name.to_string();
    }

    pub fn set_vpn_cert_credentials(
        &mut self,
        sink: &dyn PropertySink,
        client_cert_id: &str,
        username: &str,
        user_passphrase: &str,
        group_name: &str,
    ) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Vpn(vpn) = &mut self.variant else {
            return;
        };
        write_string(sink, &self.service_path, keys::L2TP_IPSEC_CLIENT_CERT_ID, client_cert_id);
        vpn.client_cert_id.assign(client_cert_id);
        write_string(sink, &self.service_path, keys::L2TP_IPSEC_USER, username);
        vpn.username = username.to_string();
        if !user_passphrase.is_empty() {
            write_string(sink, &self.service_path, keys::L2TP_IPSEC_PASSWORD, user_passphrase);
            vpn.user_passphrase.assign(user_passphrase);
        }
        write_string(sink, &self.service_path, keys::L2TP_IPSEC_GROUP_NAME, group_name);
        vpn.group_name = group_name.to_string();
    }

    pub fn set_open_vpn_credentials(
        &mut self,
        sink: &dyn PropertySink,
        client_cert_id: &str,
        username: &str,
        user_passphrase: &str,
        otp: &str,
    ) {
        if !sink_ready(sink, &self.service_path) {
            return;
        }
        let Variant::Vpn(vpn) = &mut self.variant else {
            return;
        };
        write_string(sink, &self.service_path, keys::OPEN_VPN_CLIENT_CERT_ID, client_cert_id);
        vpn.client_cert_id.assign(client_cert_id);
        write_string(sink, &self.service_path, keys::OPEN_VPN_USER, username);
        vpn.username = username.to_string();
        if !user_passphrase.is_empty() {
            write_string(sink, &self.service_path, keys::OPEN_VPN_PASSWORD, user_passphrase);
            vpn.user_passphrase.assign(user_passphrase);
        }
        // One-time password goes to the stack only; it is never stored.
        write_string(sink, &self.service_path, keys::OPEN_VPN_OTP, otp);
    }

    /// Whether the connect dialog must gather more input before an attempt
    /// can be handed to the stack. Only VPNs ever need more.
    pub fn needs_more_info_to_connect(&self) -> bool {
        match &self.variant {
            Variant::Vpn(vpn) => vpn.needs_more_info_to_connect(self.error.is_some()),
            _ => false,
        }
    }

    // ---- Connection attempts.

    /// Run the pre-connection hook for this service. For wifi and VPN
    /// services configured with a certificate pattern this resolves the
    /// pattern (possibly suspending on enrollment); everything else
    /// completes the ticket immediately.
    pub fn attempt_connection(
        &mut self,
        sink: &dyn PropertySink,
        cert_store: Option<&dyn CertificateStore>,
        enrollment: Option<&dyn EnrollmentHandler>,
        ticket: ResolveTicket,
    ) {
        self.connection_started = true;
        let mode = match &self.variant {
            Variant::Wifi(wifi) => wifi.client_cert_mode().clone(),
            Variant::Vpn(vpn) => vpn.client_cert_mode().clone(),
            _ => ClientCertMode::None,
        };
        match mode {
            ClientCertMode::Pattern(pattern) => {
                self.match_certificate_pattern(&pattern, sink, cert_store, enrollment, ticket);
            }
            ClientCertMode::Reference(pkcs11_id) => {
                self.write_client_cert_id(sink, &pkcs11_id);
                ticket.complete();
            }
            ClientCertMode::None => ticket.complete(),
        }
    }

    fn match_certificate_pattern(
        &mut self,
        pattern: &CertificatePattern,
        sink: &dyn PropertySink,
        cert_store: Option<&dyn CertificateStore>,
        enrollment: Option<&dyn EnrollmentHandler>,
        ticket: ResolveTicket,
    ) {
        if pattern.is_empty() {
            // Nothing to match against.
            ticket.complete();
            return;
        }
        let matched = cert_store
            .and_then(|store| store.find_match(pattern).map(|handle| store.id_of(&handle)));
        match matched {
            Some(pkcs11_id) => {
                self.write_client_cert_id(sink, &pkcs11_id);
                ticket.complete();
            }
            None => {
                if let Some(handler) = enrollment {
                    tracing::info!(
                        path = %self.service_path,
                        "No matching client certificate, delegating to enrollment"
                    );
                    // The enrollment flow is now the sole owner of the
                    // ticket; it completes it when the user finishes, or
                    // never if they cancel.
                    handler.enroll(&pattern.enrollment_uris, ticket);
                    return;
                }
                // Proceed without a certificate; the attempt will surface as
                // a connect failure downstream.
                ticket.complete();
            }
        }
    }

    fn write_client_cert_id(&mut self, sink: &dyn PropertySink, pkcs11_id: &str) {
        match self.kind {
            ConnectionKind::Wifi => self.set_eap_client_cert_id(sink, pkcs11_id),
            ConnectionKind::Vpn => {
                if !sink_ready(sink, &self.service_path) {
                    return;
                }
                let Variant::Vpn(vpn) = &mut self.variant else {
                    return;
                };
                let key = match vpn.provider_type() {
                    super::vpn::VpnProviderType::OpenVpn => keys::OPEN_VPN_CLIENT_CERT_ID,
                    _ => keys::L2TP_IPSEC_CLIENT_CERT_ID,
                };
                write_string(sink, &self.service_path, key, pkcs11_id);
                vpn.client_cert_id.assign(pkcs11_id);
            }
            _ => {}
        }
    }
}

/// Strip unprintable control characters from a stack-provided display name,
/// substituting U+FFFD so the string stays visibly "something was here".
fn sanitized_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if (c as u32) < 0x20 { '\u{FFFD}' } else { c })
        .collect()
}

fn write_string(sink: &dyn PropertySink, path: &str, key: &str, value: &str) {
    sink.set_property(path, key, Value::String(value.to_string()));
}

fn write_or_clear_string(sink: &dyn PropertySink, path: &str, key: &str, value: &str) {
    if value.is_empty() {
        sink.clear_property(path, key);
    } else {
        write_string(sink, path, key, value);
    }
}

fn write_bool(sink: &dyn PropertySink, path: &str, key: &str, value: bool) {
    sink.set_property(path, key, Value::Bool(value));
}

fn write_int(sink: &dyn PropertySink, path: &str, key: &str, value: i64) {
    sink.set_property(path, key, Value::from(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::certs::IssuerSubjectPattern;
    use crate::manager::stub::{RecordedWrite, StubCertStore, StubEnrollment, StubIpQuery, StubSink};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn wifi_network(path: &str) -> Network {
        Network::new(path, ConnectionKind::Wifi)
    }

    fn apply(network: &mut Network, key: &str, value: Value) -> (Applied, bool) {
        let ip = StubIpQuery::default();
        network.apply_property(key, &value, &ip)
    }

    #[test]
    fn test_same_state_is_a_noop() {
        let ip = StubIpQuery::default();
        let mut network = wifi_network("/service/wifi1");
        assert!(network.set_state(ConnectionState::Ready, &ip));
        assert!(!network.set_state(ConnectionState::Ready, &ip));
    }

    #[test]
    fn test_failure_from_active_state_sets_notification_and_error() {
        let ip = StubIpQuery::default();
        let mut network = wifi_network("/service/wifi1");
        network.set_state(ConnectionState::Association, &ip);
        network.set_state(ConnectionState::Failure, &ip);
        assert!(network.notify_failure());
        assert_eq!(network.error(), Some(ConnectionError::Unknown));
    }

    #[test]
    fn test_failure_from_idle_is_not_notified() {
        let ip = StubIpQuery::default();
        let mut network = wifi_network("/service/wifi1");
        network.set_state(ConnectionState::Idle, &ip);
        network.set_state(ConnectionState::Failure, &ip);
        assert!(!network.notify_failure());
        assert_eq!(network.error(), None);
    }

    #[test]
    fn test_failure_keeps_existing_error() {
        let ip = StubIpQuery::default();
        let mut network = wifi_network("/service/wifi1");
        network.set_state(ConnectionState::Configuration, &ip);
        apply(&mut network, "Error", json!("bad-passphrase"));
        network.set_state(ConnectionState::Failure, &ip);
        assert_eq!(network.error(), Some(ConnectionError::BadPassphrase));
    }

    #[test]
    fn test_leaving_connecting_clears_connection_started() {
        let ip = StubIpQuery::default();
        let mut network = wifi_network("/service/wifi1");
        network.connection_started = true;
        network.set_state(ConnectionState::Association, &ip);
        assert!(network.connection_started());
        network.set_state(ConnectionState::Ready, &ip);
        assert!(!network.connection_started());
    }

    #[test]
    fn test_ip_refresh_on_connected_transition() {
        let ip = StubIpQuery::default();
        ip.insert(
            "/device/wifi1",
            IpConfig {
                address: "192.168.1.40".to_string(),
                netmask: "255.255.255.0".to_string(),
                gateway: "192.168.1.1".to_string(),
                name_servers: "192.168.1.1".to_string(),
            },
        );
        let mut network = wifi_network("/service/wifi1");
        apply(&mut network, "Device", json!("/device/wifi1"));

        let ip_ref: &dyn IpConfigQuery = &ip;
        network.set_state(ConnectionState::Ready, ip_ref);
        let config = network.ip_config().expect("address refreshed");
        assert_eq!(config.address, "192.168.1.40");
        assert_eq!(config.prefix_length(), Some(24));

        // Dropping out of a connected state clears the assignment.
        network.set_state(ConnectionState::Idle, ip_ref);
        assert!(network.ip_config().is_none());
    }

    #[test]
    fn test_unknown_key_leaves_entity_untouched() {
        let mut network = wifi_network("/service/wifi1");
        apply(&mut network, "Name", json!("Lounge"));
        let before = format!("{:?}", network);

        let (applied, changed) = apply(&mut network, "WiFi.SomethingNew", json!("x"));
        assert_eq!(applied, Applied::Ignored);
        assert!(!changed);
        assert_eq!(format!("{:?}", network), before);
    }

    #[test]
    fn test_generic_map_stores_and_clears_untyped_properties() {
        let mut network = wifi_network("/service/wifi1");
        let (applied, changed) = apply(&mut network, "Strength", json!(72));
        assert_eq!(applied, Applied::Handled(PropertyIndex::Strength));
        assert!(changed);
        assert_eq!(network.property(PropertyIndex::Strength), Some(&json!(72)));

        // Typed fields never land in the map.
        apply(&mut network, "Name", json!("Lounge"));
        assert!(network.property(PropertyIndex::Name).is_none());

        // Null clears the slot rather than storing it.
        let (applied, changed) = apply(&mut network, "Strength", Value::Null);
        assert_eq!(applied, Applied::Handled(PropertyIndex::Strength));
        assert!(changed);
        assert!(network.property(PropertyIndex::Strength).is_none());
    }

    #[test]
    fn test_hex_ssid_decodes_into_name() {
        let mut network = wifi_network("/service/wifi1");
        let (applied, changed) = apply(&mut network, "WiFi.HexSSID", json!("48656c6c6f"));
        assert_eq!(applied, Applied::Handled(PropertyIndex::HexSsid));
        assert!(changed);
        assert_eq!(network.name(), "Hello");

        let (applied, _) = apply(&mut network, "WiFi.HexSSID", json!("zz"));
        assert_eq!(applied, Applied::Ignored);
        assert_eq!(network.name(), "Hello");
    }

    #[test]
    fn test_control_characters_are_sanitized() {
        let mut network = wifi_network("/service/wifi1");
        apply(&mut network, "Name", json!("Caf\u{0007}e"));
        assert_eq!(network.name(), "Caf\u{FFFD}e");
    }

    #[test]
    fn test_wifi_identity_buckets_match_across_wpa_rsn_psk() {
        let mut ids = Vec::new();
        for security in ["wpa", "rsn", "psk"] {
            let mut network = wifi_network("/service/wifi1");
            apply(&mut network, "Name", json!("X"));
            apply(&mut network, "Security", json!(security));
            ids.push(network.unique_id().to_string());
        }
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[1], ids[2]);
        assert_eq!(ids[0], "psk|X");
    }

    #[test]
    fn test_vpn_identity_derives_from_provider_and_host() {
        let mut network = Network::new("/service/vpn1", ConnectionKind::Vpn);
        apply(&mut network, "Provider.Type", json!("openvpn"));
        apply(&mut network, "Provider.Host", json!("vpn.example.com"));
        assert_eq!(network.unique_id(), "openvpn|vpn.example.com");
    }

    #[test]
    fn test_setters_funnel_through_sink() {
        let sink = StubSink::default();
        let mut network = wifi_network("/service/wifi1");
        network.set_passphrase(&sink, "hunter2");

        let writes = sink.writes();
        assert_eq!(
            writes,
            vec![RecordedWrite::Set {
                path: "/service/wifi1".to_string(),
                key: "Passphrase".to_string(),
                value: json!("hunter2"),
            }]
        );
        assert_eq!(network.wifi().unwrap().passphrase(), "hunter2");
    }

    #[test]
    fn test_unready_sink_short_circuits_setters() {
        let sink = StubSink::default();
        sink.set_ready(false);
        let mut network = wifi_network("/service/wifi1");
        network.set_passphrase(&sink, "hunter2");
        network.set_auto_connect(&sink, true);

        assert!(sink.writes().is_empty());
        assert_eq!(network.wifi().unwrap().passphrase(), "");
        assert!(!network.auto_connect());
    }

    #[test]
    fn test_eap_cert_id_writes_cert_and_key_ids() {
        let sink = StubSink::default();
        let mut network = wifi_network("/service/wifi1");
        network.set_eap_client_cert_id(&sink, "pkcs11:id=4a");
        let keys_written: Vec<String> = sink
            .writes()
            .into_iter()
            .map(|write| match write {
                RecordedWrite::Set { key, .. } | RecordedWrite::Clear { key, .. } => key,
                RecordedWrite::Activate { path } => path,
            })
            .collect();
        assert_eq!(keys_written, vec!["EAP.CertID", "EAP.KeyID"]);
    }

    fn pattern_network(pattern: CertificatePattern) -> Network {
        let mut network = wifi_network("/service/wifi1");
        network
            .wifi_mut()
            .unwrap()
            .set_client_cert_mode(ClientCertMode::Pattern(pattern));
        network
    }

    fn fired_flag() -> (ResolveTicket, Arc<AtomicBool>) {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in = fired.clone();
        (
            ResolveTicket::new(move || fired_in.store(true, Ordering::SeqCst)),
            fired,
        )
    }

    #[test]
    fn test_empty_pattern_resolves_synchronously_without_store_query() {
        let sink = StubSink::default();
        let store = StubCertStore::default();
        let (ticket, fired) = fired_flag();

        let mut network = pattern_network(CertificatePattern::default());
        network.attempt_connection(&sink, Some(&store), None, ticket);

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(store.query_count(), 0);
    }

    #[test]
    fn test_pattern_match_writes_cert_id_before_resolving() {
        let sink = Arc::new(StubSink::default());
        let store = StubCertStore::default();
        store.install("client-17", "Example Corp", "pkcs11:id=17");

        let pattern = CertificatePattern {
            issuer: IssuerSubjectPattern {
                organization: "Example Corp".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut network = pattern_network(pattern);

        let sink_at_fire = sink.clone();
        let writes_when_fired = Arc::new(AtomicBool::new(false));
        let writes_flag = writes_when_fired.clone();
        let ticket = ResolveTicket::new(move || {
            // The cert id write must already be visible when the
            // continuation runs.
            writes_flag.store(!sink_at_fire.writes().is_empty(), Ordering::SeqCst);
        });

        network.attempt_connection(sink.as_ref(), Some(&store), None, ticket);

        assert!(writes_when_fired.load(Ordering::SeqCst));
        assert_eq!(network.wifi().unwrap().eap_client_cert_id(), "pkcs11:id=17");
        assert_eq!(store.query_count(), 1);
    }

    #[test]
    fn test_pattern_miss_with_enrollment_does_not_resolve() {
        let sink = StubSink::default();
        let store = StubCertStore::default();
        let enrollment = StubEnrollment::default();
        let (ticket, fired) = fired_flag();

        let pattern = CertificatePattern {
            issuer: IssuerSubjectPattern {
                organization: "Example Corp".to_string(),
                ..Default::default()
            },
            enrollment_uris: vec!["https://enroll.example".to_string()],
            ..Default::default()
        };
        let mut network = pattern_network(pattern);
        network.attempt_connection(&sink, Some(&store), Some(&enrollment), ticket);

        // Responsibility transferred: only the enrollment flow may resolve.
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(enrollment.pending_count(), 1);

        enrollment.complete_all();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pattern_miss_without_enrollment_resolves_anyway() {
        let sink = StubSink::default();
        let store = StubCertStore::default();
        let (ticket, fired) = fired_flag();

        let pattern = CertificatePattern {
            issuer: IssuerSubjectPattern {
                organization: "Nowhere Inc".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut network = pattern_network(pattern);
        network.attempt_connection(&sink, Some(&store), None, ticket);

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(network.wifi().unwrap().eap_client_cert_id(), "");
    }

    #[test]
    fn test_erase_credentials_is_idempotent() {
        let mut network = wifi_network("/service/wifi1");
        let sink = StubSink::default();
        network.set_passphrase(&sink, "secret");
        network.erase_credentials();
        network.erase_credentials();
        assert_eq!(network.wifi().unwrap().passphrase(), "");
    }
}
