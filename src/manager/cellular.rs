//! Cellular service configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::assign;
use super::plan::{CellularDataPlan, DataLeft, PlanThresholds};
use super::property::{keys, PropertyIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    #[default]
    Unknown,
    NotActivated,
    Activating,
    PartiallyActivated,
    Activated,
}

impl ActivationState {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "not-activated" => Some(ActivationState::NotActivated),
            "activating" => Some(ActivationState::Activating),
            "partially-activated" => Some(ActivationState::PartiallyActivated),
            "activated" => Some(ActivationState::Activated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkTechnology {
    #[default]
    Unknown,
    OneXrtt,
    Evdo,
    Gprs,
    Edge,
    Umts,
    Hspa,
    HspaPlus,
    Lte,
    LteAdvanced,
    Gsm,
}

impl NetworkTechnology {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "1xRTT" => Some(NetworkTechnology::OneXrtt),
            "EVDO" => Some(NetworkTechnology::Evdo),
            "GPRS" => Some(NetworkTechnology::Gprs),
            "EDGE" => Some(NetworkTechnology::Edge),
            "UMTS" => Some(NetworkTechnology::Umts),
            "HSPA" => Some(NetworkTechnology::Hspa),
            "HSPA+" => Some(NetworkTechnology::HspaPlus),
            "LTE" => Some(NetworkTechnology::Lte),
            "LTE Advanced" => Some(NetworkTechnology::LteAdvanced),
            "GSM" => Some(NetworkTechnology::Gsm),
            _ => None,
        }
    }

    /// Display abbreviation. These are industry terms, not localized text.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkTechnology::Unknown => "",
            NetworkTechnology::OneXrtt => "1xRTT",
            NetworkTechnology::Evdo => "EVDO",
            NetworkTechnology::Gprs => "GPRS",
            NetworkTechnology::Edge => "EDGE",
            NetworkTechnology::Umts => "UMTS",
            NetworkTechnology::Hspa => "HSPA",
            NetworkTechnology::HspaPlus => "HSPA+",
            NetworkTechnology::Lte => "LTE",
            NetworkTechnology::LteAdvanced => "LTE Advanced",
            NetworkTechnology::Gsm => "GSM",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoamingState {
    #[default]
    Unknown,
    Home,
    Roaming,
}

impl RoamingState {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "home" => Some(RoamingState::Home),
            "roaming" => Some(RoamingState::Roaming),
            _ => None,
        }
    }
}

/// Access point configuration for a cellular connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularApn {
    pub apn: String,
    pub network_id: String,
    pub username: String,
    pub password: String,
    pub name: String,
    pub localized_name: String,
    pub language: String,
}

impl CellularApn {
    /// Populate from a stack dictionary. Keys absent from the dictionary
    /// clear the corresponding field.
    pub fn from_dict(dict: &serde_json::Map<String, Value>) -> Self {
        let field = |key: &str| {
            dict.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            apn: field(keys::APN_APN),
            network_id: field(keys::APN_NETWORK_ID),
            username: field(keys::APN_USERNAME),
            password: field(keys::APN_PASSWORD),
            name: field(keys::APN_NAME),
            localized_name: field(keys::APN_LOCALIZED_NAME),
            language: field(keys::APN_LANGUAGE),
        }
    }

    /// Only the fields needed for establishing connections go back to the
    /// stack; the descriptive ones stay local.
    pub(crate) fn to_connect_dict(&self) -> Value {
        serde_json::json!({
            keys::APN_APN: self.apn,
            keys::APN_NETWORK_ID: self.network_id,
            keys::APN_USERNAME: self.username,
            keys::APN_PASSWORD: self.password,
        })
    }
}

#[derive(Debug, Default)]
pub struct CellularConfig {
    pub(crate) activation_state: ActivationState,
    pub(crate) network_technology: NetworkTechnology,
    pub(crate) roaming_state: RoamingState,
    pub(crate) apn: CellularApn,
    pub(crate) usage_url: String,
    pub(crate) payment_url: String,
    pub(crate) data_plans: Vec<CellularDataPlan>,
    pub(crate) data_left: DataLeft,
    pub(crate) needs_new_plan: bool,
}

impl CellularConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation_state
    }

    pub fn network_technology(&self) -> NetworkTechnology {
        self.network_technology
    }

    pub fn roaming_state(&self) -> RoamingState {
        self.roaming_state
    }

    pub fn apn(&self) -> &CellularApn {
        &self.apn
    }

    pub fn usage_url(&self) -> &str {
        &self.usage_url
    }

    pub fn payment_url(&self) -> &str {
        &self.payment_url
    }

    pub fn data_plans(&self) -> &[CellularDataPlan] {
        &self.data_plans
    }

    pub fn data_left(&self) -> DataLeft {
        self.data_left
    }

    /// The plan used for warnings and "needs new plan" decisions: the most
    /// recently received one.
    pub fn significant_plan(&self) -> Option<&CellularDataPlan> {
        self.data_plans.last()
    }

    /// A service needs activation while the modem reports anything between
    /// "not activated" and "partially activated", or when the current plan
    /// is exhausted and a superseding one is required.
    pub fn needs_activation(&self) -> bool {
        (self.activation_state != ActivationState::Activated
            && self.activation_state != ActivationState::Unknown)
            || self.needs_new_plan
    }

    pub fn supports_data_plan(&self) -> bool {
        !self.usage_url.is_empty() || !self.payment_url.is_empty()
    }

    /// Replace the plan cache with a fresh carrier snapshot, deduplicated,
    /// and recompute the derived warning level.
    pub fn update_data_plans(
        &mut self,
        plans: Vec<CellularDataPlan>,
        now: DateTime<Utc>,
        thresholds: &PlanThresholds,
    ) {
        self.data_plans.clear();
        for plan in plans {
            let id = plan.unique_identifier();
            if self
                .data_plans
                .iter()
                .any(|existing| existing.unique_identifier() == id)
            {
                continue;
            }
            self.data_plans.push(plan);
        }
        self.data_left = match self.significant_plan() {
            Some(plan) => plan.data_left(now, thresholds),
            None => DataLeft::Unknown,
        };
        self.needs_new_plan = self.supports_data_plan() && self.data_left == DataLeft::None;
    }

    pub(crate) fn apply(&mut self, index: PropertyIndex, value: &Value) -> Option<bool> {
        match index {
            PropertyIndex::ActivationState => {
                let state = ActivationState::from_value(value.as_str()?)?;
                Some(assign(&mut self.activation_state, state))
            }
            PropertyIndex::NetworkTechnology => {
                let technology = NetworkTechnology::from_value(value.as_str()?)?;
                Some(assign(&mut self.network_technology, technology))
            }
            PropertyIndex::RoamingState => {
                let roaming = RoamingState::from_value(value.as_str()?)?;
                Some(assign(&mut self.roaming_state, roaming))
            }
            PropertyIndex::Apn => {
                let apn = CellularApn::from_dict(value.as_object()?);
                Some(assign(&mut self.apn, apn))
            }
            PropertyIndex::UsageUrl => {
                Some(assign(&mut self.usage_url, value.as_str()?.to_string()))
            }
            PropertyIndex::PaymentUrl => {
                Some(assign(&mut self.payment_url, value.as_str()?.to_string()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::plan::CellularDataPlanType;
    use chrono::Duration;

    #[test]
    fn test_needs_activation_matrix() {
        let mut cellular = CellularConfig::new();
        assert!(!cellular.needs_activation());

        cellular.activation_state = ActivationState::NotActivated;
        assert!(cellular.needs_activation());

        cellular.activation_state = ActivationState::PartiallyActivated;
        assert!(cellular.needs_activation());

        cellular.activation_state = ActivationState::Activated;
        assert!(!cellular.needs_activation());

        cellular.needs_new_plan = true;
        assert!(cellular.needs_activation());
    }

    #[test]
    fn test_supports_data_plan_requires_a_url() {
        let mut cellular = CellularConfig::new();
        assert!(!cellular.supports_data_plan());
        cellular.usage_url = "https://usage.example".to_string();
        assert!(cellular.supports_data_plan());
        cellular.usage_url.clear();
        cellular.payment_url = "https://pay.example".to_string();
        assert!(cellular.supports_data_plan());
    }

    #[test]
    fn test_update_data_plans_dedupes_and_flags_exhaustion() {
        let now = Utc::now();
        let plan = CellularDataPlan {
            plan_name: "Base".to_string(),
            plan_type: CellularDataPlanType::MeteredBase,
            update_time: now,
            plan_start_time: now - Duration::days(5),
            plan_end_time: now + Duration::days(25),
            plan_data_bytes: 1000,
            data_bytes_used: 1000,
        };
        let mut cellular = CellularConfig::new();
        cellular.payment_url = "https://pay.example".to_string();

        cellular.update_data_plans(
            vec![plan.clone(), plan.clone()],
            now,
            &PlanThresholds::default(),
        );
        assert_eq!(cellular.data_plans().len(), 1);
        assert_eq!(cellular.data_left(), DataLeft::None);
        assert!(cellular.needs_new_plan);
        assert!(cellular.needs_activation());
    }

    #[test]
    fn test_apn_from_dict_clears_missing_fields() {
        let dict = serde_json::json!({ "apn": "internet", "username": "user" });
        let apn = CellularApn::from_dict(dict.as_object().unwrap());
        assert_eq!(apn.apn, "internet");
        assert_eq!(apn.username, "user");
        assert_eq!(apn.network_id, "");
        assert_eq!(apn.password, "");
    }
}
