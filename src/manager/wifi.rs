//! Wifi service configuration
//!
//! Holds the encryption scheme, passphrase pair (stack-reported vs user-set)
//! and the 802.1X EAP fields. Everything credential-shaped lives in
//! [`Secret`] so "forget network" can wipe it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::assign;
use super::certs::ClientCertMode;
use super::network::ConnectionError;
use super::property::PropertyIndex;
use super::secrets::Secret;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSecurity {
    #[default]
    Unknown,
    None,
    Wep,
    Wpa,
    Rsn,
    Psk,
    Eap8021x,
}

impl ConnectionSecurity {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "none" => Some(ConnectionSecurity::None),
            "wep" => Some(ConnectionSecurity::Wep),
            "wpa" => Some(ConnectionSecurity::Wpa),
            "rsn" => Some(ConnectionSecurity::Rsn),
            "psk" => Some(ConnectionSecurity::Psk),
            "802_1x" => Some(ConnectionSecurity::Eap8021x),
            _ => Option::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionSecurity::Unknown => "unknown",
            ConnectionSecurity::None => "none",
            ConnectionSecurity::Wep => "wep",
            ConnectionSecurity::Wpa => "wpa",
            ConnectionSecurity::Rsn => "rsn",
            ConnectionSecurity::Psk => "psk",
            ConnectionSecurity::Eap8021x => "802_1x",
        }
    }

    /// The stack treats WPA and RSN as PSK internally, so they collapse to
    /// one bucket for unique-identity purposes.
    pub fn for_identity(self) -> Self {
        match self {
            ConnectionSecurity::Wpa | ConnectionSecurity::Rsn => ConnectionSecurity::Psk,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EapMethod {
    #[default]
    Unknown,
    Peap,
    Tls,
    Ttls,
    Leap,
}

impl EapMethod {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "PEAP" => Some(EapMethod::Peap),
            "TLS" => Some(EapMethod::Tls),
            "TTLS" => Some(EapMethod::Ttls),
            "LEAP" => Some(EapMethod::Leap),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EapMethod::Unknown => "",
            EapMethod::Peap => "PEAP",
            EapMethod::Tls => "TLS",
            EapMethod::Ttls => "TTLS",
            EapMethod::Leap => "LEAP",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EapPhase2Auth {
    #[default]
    Auto,
    Md5,
    Mschapv2,
    Mschap,
    Pap,
    Chap,
}

impl EapPhase2Auth {
    /// Accepts both the PEAP (`auth=`) and TTLS (`autheap=`) spellings.
    pub fn from_value(value: &str) -> Option<Self> {
        let bare = value
            .strip_prefix("autheap=")
            .or_else(|| value.strip_prefix("auth="))
            .unwrap_or(value);
        match bare {
            "MD5" => Some(EapPhase2Auth::Md5),
            "MSCHAPV2" => Some(EapPhase2Auth::Mschapv2),
            "MSCHAP" => Some(EapPhase2Auth::Mschap),
            "PAP" => Some(EapPhase2Auth::Pap),
            "CHAP" => Some(EapPhase2Auth::Chap),
            _ => None,
        }
    }

    /// The sink spelling depends on the outer method: PEAP tunnels a plain
    /// auth, TTLS an inner EAP.
    pub(crate) fn sink_value(self, method: EapMethod) -> Option<String> {
        let bare = match self {
            EapPhase2Auth::Auto => return None,
            EapPhase2Auth::Md5 => "MD5",
            EapPhase2Auth::Mschapv2 => "MSCHAPV2",
            EapPhase2Auth::Mschap => "MSCHAP",
            EapPhase2Auth::Pap => "PAP",
            EapPhase2Auth::Chap => "CHAP",
        };
        let prefix = if method == EapMethod::Peap {
            "auth="
        } else {
            "autheap="
        };
        Some(format!("{prefix}{bare}"))
    }
}

#[derive(Debug, Default)]
pub struct WifiConfig {
    pub(crate) encryption: ConnectionSecurity,
    /// Passphrase as remembered by the stack.
    pub(crate) passphrase: Secret,
    /// Passphrase as last entered by the user; preferred on read.
    pub(crate) user_passphrase: Secret,
    pub(crate) passphrase_required: bool,
    pub(crate) identity: String,
    pub(crate) eap_method: EapMethod,
    pub(crate) eap_phase_2_auth: EapPhase2Auth,
    pub(crate) eap_use_system_cas: bool,
    pub(crate) eap_identity: Secret,
    pub(crate) eap_anonymous_identity: Secret,
    pub(crate) eap_passphrase: Secret,
    pub(crate) eap_ca_cert_nickname: String,
    pub(crate) eap_client_cert_id: Secret,
    pub(crate) client_cert_mode: ClientCertMode,
}

impl WifiConfig {
    pub fn new() -> Self {
        Self {
            eap_use_system_cas: true,
            ..Default::default()
        }
    }

    pub fn encryption(&self) -> ConnectionSecurity {
        self.encryption
    }

    /// The effective passphrase: the user-entered value wins over the
    /// stack-remembered one.
    pub fn passphrase(&self) -> &str {
        if !self.user_passphrase.is_empty() {
            self.user_passphrase.as_str()
        } else {
            self.passphrase.as_str()
        }
    }

    pub fn eap_method(&self) -> EapMethod {
        self.eap_method
    }

    pub fn eap_identity(&self) -> &str {
        self.eap_identity.as_str()
    }

    pub fn eap_client_cert_id(&self) -> &str {
        self.eap_client_cert_id.as_str()
    }

    pub fn client_cert_mode(&self) -> &ClientCertMode {
        &self.client_cert_mode
    }

    pub fn set_client_cert_mode(&mut self, mode: ClientCertMode) {
        self.client_cert_mode = mode;
    }

    /// Whether a connection attempt needs a passphrase the model does not
    /// have. 802.1X is judged on connectability instead, and a bad-passphrase
    /// error always re-prompts.
    pub fn is_passphrase_required(
        &self,
        error: Option<ConnectionError>,
        connectable: bool,
    ) -> bool {
        if matches!(
            error,
            Some(ConnectionError::BadPassphrase) | Some(ConnectionError::BadWepKey)
        ) {
            return true;
        }
        if self.encryption == ConnectionSecurity::Eap8021x {
            return !connectable;
        }
        self.passphrase_required
    }

    /// Local half of a user passphrase change. An empty value restores the
    /// stack-remembered passphrase instead of clearing both copies.
    pub(crate) fn set_passphrase_local(&mut self, passphrase: &str) {
        if !passphrase.is_empty() {
            self.user_passphrase.set(passphrase);
            self.passphrase.set(passphrase);
        } else {
            let remembered = self.passphrase.as_str().to_string();
            self.user_passphrase.set(&remembered);
        }
    }

    pub(crate) fn erase_credentials(&mut self) {
        self.passphrase.wipe();
        self.user_passphrase.wipe();
        self.eap_client_cert_id.wipe();
        self.eap_identity.wipe();
        self.eap_anonymous_identity.wipe();
        self.eap_passphrase.wipe();
    }

    pub(crate) fn apply(&mut self, index: PropertyIndex, value: &Value) -> Option<bool> {
        match index {
            PropertyIndex::Security => {
                let encryption = ConnectionSecurity::from_value(value.as_str()?)?;
                Some(assign(&mut self.encryption, encryption))
            }
            PropertyIndex::Passphrase => Some(self.passphrase.assign(value.as_str()?)),
            PropertyIndex::PassphraseRequired => {
                Some(assign(&mut self.passphrase_required, value.as_bool()?))
            }
            PropertyIndex::Identity => {
                Some(assign(&mut self.identity, value.as_str()?.to_string()))
            }
            PropertyIndex::EapMethod => {
                let method = EapMethod::from_value(value.as_str()?)?;
                Some(assign(&mut self.eap_method, method))
            }
            PropertyIndex::EapPhase2Auth => {
                let auth = EapPhase2Auth::from_value(value.as_str()?)?;
                Some(assign(&mut self.eap_phase_2_auth, auth))
            }
            PropertyIndex::EapIdentity => Some(self.eap_identity.assign(value.as_str()?)),
            PropertyIndex::EapAnonymousIdentity => {
                Some(self.eap_anonymous_identity.assign(value.as_str()?))
            }
            PropertyIndex::EapPassphrase => Some(self.eap_passphrase.assign(value.as_str()?)),
            PropertyIndex::EapCaCertNickname => {
                Some(assign(&mut self.eap_ca_cert_nickname, value.as_str()?.to_string()))
            }
            PropertyIndex::EapClientCertId => {
                Some(self.eap_client_cert_id.assign(value.as_str()?))
            }
            PropertyIndex::EapUseSystemCas => {
                Some(assign(&mut self.eap_use_system_cas, value.as_bool()?))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_bucket_folds_wpa_and_rsn_into_psk() {
        assert_eq!(
            ConnectionSecurity::Wpa.for_identity(),
            ConnectionSecurity::Psk
        );
        assert_eq!(
            ConnectionSecurity::Rsn.for_identity(),
            ConnectionSecurity::Psk
        );
        assert_eq!(
            ConnectionSecurity::Psk.for_identity(),
            ConnectionSecurity::Psk
        );
        assert_eq!(
            ConnectionSecurity::Wep.for_identity(),
            ConnectionSecurity::Wep
        );
    }

    #[test]
    fn test_user_passphrase_wins_on_read() {
        let mut wifi = WifiConfig::new();
        wifi.passphrase.set("from-stack");
        assert_eq!(wifi.passphrase(), "from-stack");
        wifi.set_passphrase_local("from-user");
        assert_eq!(wifi.passphrase(), "from-user");
    }

    #[test]
    fn test_empty_passphrase_restores_stack_value() {
        let mut wifi = WifiConfig::new();
        wifi.passphrase.set("remembered");
        wifi.set_passphrase_local("");
        assert_eq!(wifi.passphrase(), "remembered");
    }

    #[test]
    fn test_erase_wipes_every_credential_field() {
        let mut wifi = WifiConfig::new();
        wifi.passphrase.set("a");
        wifi.user_passphrase.set("b");
        wifi.eap_client_cert_id.set("c");
        wifi.eap_identity.set("d");
        wifi.eap_anonymous_identity.set("e");
        wifi.eap_passphrase.set("f");

        wifi.erase_credentials();

        assert!(wifi.passphrase.is_empty());
        assert!(wifi.user_passphrase.is_empty());
        assert!(wifi.eap_client_cert_id.is_empty());
        assert!(wifi.eap_identity.is_empty());
        assert!(wifi.eap_anonymous_identity.is_empty());
        assert!(wifi.eap_passphrase.is_empty());
        assert!(wifi.passphrase.backing().iter().all(|&b| b == 0));
        assert!(wifi.eap_passphrase.backing().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_passphrase_required_for_8021x_tracks_connectable() {
        let mut wifi = WifiConfig::new();
        wifi.encryption = ConnectionSecurity::Eap8021x;
        assert!(wifi.is_passphrase_required(None, false));
        assert!(!wifi.is_passphrase_required(None, true));
    }

    #[test]
    fn test_bad_passphrase_error_forces_reprompt() {
        let mut wifi = WifiConfig::new();
        wifi.encryption = ConnectionSecurity::Psk;
        wifi.passphrase_required = false;
        assert!(wifi.is_passphrase_required(Some(ConnectionError::BadPassphrase), true));
    }

    #[test]
    fn test_phase2_parse_accepts_both_spellings() {
        assert_eq!(
            EapPhase2Auth::from_value("auth=MSCHAPV2"),
            Some(EapPhase2Auth::Mschapv2)
        );
        assert_eq!(
            EapPhase2Auth::from_value("autheap=MD5"),
            Some(EapPhase2Auth::Md5)
        );
        assert_eq!(EapPhase2Auth::from_value("PAP"), Some(EapPhase2Auth::Pap));
    }
}
