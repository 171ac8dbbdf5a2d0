//! Network entity state manager
//!
//! [`NetworkStateManager`] owns the in-memory model of network devices and
//! services:
//!
//! - `devices`: canonical map of device path to [`device::NetworkDevice`].
//! - `visible`: canonical map of service path to [`network::Network`] for
//!   every currently observable service, ordered most relevant first as
//!   reported by the stack.
//! - `remembered`: previously saved favorites from the active profile,
//!   ordered most preferred first.
//! - unique-identity indexes per registry, correlating a visible service
//!   with its remembered counterpart and deduplicating re-announcements.
//!
//! Inbound updates arrive either as single `(path, key, value)` pairs or as
//! full list snapshots; snapshots are reconciled in place so surviving
//! entries keep their instance identity. All mutation happens on the thread
//! the manager was created on; calls from any other thread are rejected and
//! logged, never silently allowed.

pub mod cellular;
pub mod certs;
pub mod device;
pub mod network;
pub mod plan;
pub mod property;
pub mod secrets;
pub mod stub;
pub mod transport;
pub mod vpn;
pub mod wifi;

pub(crate) use device::assign;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use certs::{CertificateStore, EnrollmentHandler, ResolveTicket};
use device::{DeviceKind, NetworkDevice};
use network::{ConnectionKind, ConnectionState, Network};
use plan::{CellularDataPlan, PlanThresholds};
use property::{keys, Applied, PropertyIndex};
use transport::{IpConfigQuery, PropertySink};

/// Notification fired after a mutation has been fully applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    NetworkPropertyChanged {
        service_path: String,
        kind: ConnectionKind,
        index: PropertyIndex,
    },
    NetworkStateChanged {
        service_path: String,
        kind: ConnectionKind,
        state: ConnectionState,
    },
    DevicePropertyChanged {
        device_path: String,
        index: PropertyIndex,
    },
    DataPlansUpdated {
        service_path: String,
    },
    ServiceListChanged,
    DeviceListChanged,
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverFilter {
    /// Events for one service path.
    Service(String),
    /// Events for one device path.
    Device(String),
    /// Events for every service of one kind.
    Kind(ConnectionKind),
    /// Everything, including list reconciliations.
    All,
}

struct Subscription {
    filter: ObserverFilter,
    tx: mpsc::UnboundedSender<StateEvent>,
}

impl Subscription {
    fn wants(&self, event: &StateEvent) -> bool {
        match (&self.filter, event) {
            (ObserverFilter::All, _) => true,
            (
                ObserverFilter::Service(path),
                StateEvent::NetworkPropertyChanged { service_path, .. }
                | StateEvent::NetworkStateChanged { service_path, .. }
                | StateEvent::DataPlansUpdated { service_path },
            ) => path == service_path,
            (
                ObserverFilter::Kind(kind),
                StateEvent::NetworkPropertyChanged { kind: event_kind, .. }
                | StateEvent::NetworkStateChanged { kind: event_kind, .. },
            ) => kind == event_kind,
            (
                ObserverFilter::Device(path),
                StateEvent::DevicePropertyChanged { device_path, .. },
            ) => path == device_path,
            _ => false,
        }
    }
}

/// The in-memory model of everything the network stack has told us.
pub struct NetworkStateManager {
    owner: ThreadId,
    sink: Arc<dyn PropertySink>,
    ip_query: Arc<dyn IpConfigQuery>,
    cert_store: Option<Arc<dyn CertificateStore>>,
    enrollment: Option<Arc<dyn EnrollmentHandler>>,
    plan_thresholds: PlanThresholds,

    devices: HashMap<String, Box<NetworkDevice>>,
    device_order: Vec<String>,

    visible: HashMap<String, Box<Network>>,
    visible_order: Vec<String>,
    visible_ids: HashMap<String, String>,

    remembered: HashMap<String, Box<Network>>,
    remembered_order: Vec<String>,
    remembered_ids: HashMap<String, String>,

    observers: Vec<Subscription>,
}

impl NetworkStateManager {
    pub fn new(sink: Arc<dyn PropertySink>, ip_query: Arc<dyn IpConfigQuery>) -> Self {
        Self {
            owner: thread::current().id(),
            sink,
            ip_query,
            cert_store: None,
            enrollment: None,
            plan_thresholds: PlanThresholds::default(),
            devices: HashMap::new(),
            device_order: Vec::new(),
            visible: HashMap::new(),
            visible_order: Vec::new(),
            visible_ids: HashMap::new(),
            remembered: HashMap::new(),
            remembered_order: Vec::new(),
            remembered_ids: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn set_certificate_store(&mut self, store: Arc<dyn CertificateStore>) {
        self.cert_store = Some(store);
    }

    pub fn set_enrollment_handler(&mut self, handler: Arc<dyn EnrollmentHandler>) {
        self.enrollment = Some(handler);
    }

    pub fn set_plan_thresholds(&mut self, thresholds: PlanThresholds) {
        self.plan_thresholds = thresholds;
    }

    /// The entity maps are not synchronized; every mutation must come from
    /// the thread that created the manager.
    fn on_owner_thread(&self, operation: &str) -> bool {
        if thread::current().id() == self.owner {
            true
        } else {
            tracing::error!(
                operation,
                "Entity mutation attempted from non-owner thread; rejected"
            );
            false
        }
    }

    // ---- Lookups.

    pub fn device(&self, device_path: &str) -> Option<&NetworkDevice> {
        self.devices.get(device_path).map(|device| &**device)
    }

    pub fn devices(&self) -> impl Iterator<Item = &NetworkDevice> {
        self.device_order
            .iter()
            .filter_map(|path| self.devices.get(path).map(|device| &**device))
    }

    pub fn visible_network(&self, service_path: &str) -> Option<&Network> {
        self.visible.get(service_path).map(|network| &**network)
    }

    pub fn remembered_network(&self, service_path: &str) -> Option<&Network> {
        self.remembered.get(service_path).map(|network| &**network)
    }

    /// Visible services, most relevant first.
    pub fn visible_networks(&self) -> impl Iterator<Item = &Network> {
        self.visible_order
            .iter()
            .filter_map(|path| self.visible.get(path).map(|network| &**network))
    }

    pub fn visible_networks_of_kind(&self, kind: ConnectionKind) -> impl Iterator<Item = &Network> {
        self.visible_networks().filter(move |network| network.kind() == kind)
    }

    /// Remembered services, most preferred first.
    pub fn remembered_networks(&self) -> impl Iterator<Item = &Network> {
        self.remembered_order
            .iter()
            .filter_map(|path| self.remembered.get(path).map(|network| &**network))
    }

    pub fn find_visible_by_unique_id(&self, unique_id: &str) -> Option<&Network> {
        self.visible_ids
            .get(unique_id)
            .and_then(|path| self.visible_network(path))
    }

    pub fn find_remembered_by_unique_id(&self, unique_id: &str) -> Option<&Network> {
        self.remembered_ids
            .get(unique_id)
            .and_then(|path| self.remembered_network(path))
    }

    // ---- Observers.

    pub fn subscribe(&mut self, filter: ObserverFilter) -> mpsc::UnboundedReceiver<StateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Subscription { filter, tx });
        rx
    }

    fn notify(&mut self, event: StateEvent) {
        self.observers
            .retain(|subscription| {
                !subscription.wants(&event) || subscription.tx.send(event.clone()).is_ok()
            });
    }

    // ---- Inbound property updates.

    /// Apply one property update for a visible service. Unknown services and
    /// unknown keys are ignored, never an error.
    pub fn apply_service_property(
        &mut self,
        service_path: &str,
        key: &str,
        value: &Value,
    ) -> Applied {
        if !self.on_owner_thread("apply_service_property") {
            return Applied::Ignored;
        }
        let Some(network) = self.visible.get_mut(service_path) else {
            tracing::debug!(path = %service_path, key, "Property update for unknown service");
            return Applied::Ignored;
        };
        let id_before = network.unique_id().to_string();
        let (applied, changed) = network.apply_property(key, value, self.ip_query.as_ref());
        let id_after = network.unique_id().to_string();
        let kind = network.kind();
        let state = network.state();

        if id_before != id_after {
            reindex(&mut self.visible_ids, &id_before, &id_after, service_path);
        }
        if changed {
            let event = match applied {
                Applied::Handled(PropertyIndex::State) => StateEvent::NetworkStateChanged {
                    service_path: service_path.to_string(),
                    kind,
                    state,
                },
                Applied::Handled(index) => StateEvent::NetworkPropertyChanged {
                    service_path: service_path.to_string(),
                    kind,
                    index,
                },
                Applied::Ignored => return applied,
            };
            self.notify(event);
        }
        applied
    }

    /// Apply one property update for a device.
    pub fn apply_device_property(&mut self, device_path: &str, key: &str, value: &Value) -> Applied {
        if !self.on_owner_thread("apply_device_property") {
            return Applied::Ignored;
        }
        let Some(found) = self.devices.get_mut(device_path) else {
            tracing::debug!(path = %device_path, key, "Property update for unknown device");
            return Applied::Ignored;
        };
        let (applied, changed) = found.apply_property(key, value);
        if changed {
            if let Applied::Handled(index) = applied {
                self.notify(StateEvent::DevicePropertyChanged {
                    device_path: device_path.to_string(),
                    index,
                });
            }
        }
        applied
    }

    /// Reconcile the visible registry against a full "Services" snapshot,
    /// ordered most relevant first. Surviving services are updated in place
    /// and keep their instance identity; entries absent from the snapshot
    /// are dropped together with their index entries.
    pub fn update_service_list(&mut self, snapshot: &[(String, Value)]) {
        if !self.on_owner_thread("update_service_list") {
            return;
        }
        let incoming: HashSet<&str> = snapshot.iter().map(|(path, _)| path.as_str()).collect();
        let stale: Vec<String> = self
            .visible
            .keys()
            .filter(|path| !incoming.contains(path.as_str()))
            .cloned()
            .collect();
        for path in stale {
            self.remove_visible(&path);
        }

        self.visible_order.clear();
        for (path, properties) in snapshot {
            let Some(info) = properties.as_object() else {
                tracing::warn!(path = %path, "Service snapshot entry is not a dictionary");
                continue;
            };
            if !self.visible.contains_key(path) {
                let kind = info
                    .get(keys::TYPE)
                    .and_then(Value::as_str)
                    .and_then(ConnectionKind::from_type_value);
                let Some(kind) = kind else {
                    tracing::warn!(path = %path, "Service snapshot entry has no usable type");
                    continue;
                };
                self.visible
                    .insert(path.clone(), Box::new(Network::new(path.clone(), kind)));
            }
            let Some(network) = self.visible.get_mut(path) else {
                continue;
            };
            let id_before = network.unique_id().to_string();
            network.parse_info(info, self.ip_query.as_ref());
            let id_after = network.unique_id().to_string();

            self.visible_order.push(path.clone());
            reindex(&mut self.visible_ids, &id_before, &id_after, path);
        }
        // Visible VPNs inherit missing credentials from their remembered
        // counterparts, correlated by unique identity.
        self.copy_remembered_credentials();
        self.notify(StateEvent::ServiceListChanged);
        tracing::debug!(count = self.visible_order.len(), "Service list reconciled");
    }

    /// Fill empty VPN credentials on visible services from their remembered
    /// counterparts.
    fn copy_remembered_credentials(&mut self) {
        for path in &self.visible_order {
            let Some(network) = self.visible.get_mut(path) else {
                continue;
            };
            if network.kind() != ConnectionKind::Vpn {
                continue;
            }
            let Some(remembered_path) = self.remembered_ids.get(network.unique_id()) else {
                continue;
            };
            let Some(remembered) = self.remembered.get(remembered_path) else {
                continue;
            };
            if let Some(remembered_vpn) = remembered.vpn() {
                tracing::debug!(path = %path, "Copying VPN credentials from remembered service");
                if let Some(network) = self.visible.get_mut(path) {
                    if let Some(visible_vpn) = network.vpn_mut() {
                        visible_vpn.copy_credentials_from(remembered_vpn);
                    }
                }
            }
        }
    }

    /// Reconcile the remembered registry against a profile snapshot, ordered
    /// most preferred first. A remembered entry that disappears had its
    /// profile entry removed, so its credentials are erased before dropping.
    pub fn update_remembered_list(&mut self, snapshot: &[(String, Value)]) {
        if !self.on_owner_thread("update_remembered_list") {
            return;
        }
        let incoming: HashSet<&str> = snapshot.iter().map(|(path, _)| path.as_str()).collect();
        let stale: Vec<String> = self
            .remembered
            .keys()
            .filter(|path| !incoming.contains(path.as_str()))
            .cloned()
            .collect();
        for path in stale {
            if let Some(mut network) = self.remembered.remove(&path) {
                network.erase_credentials();
                remove_index_entry(&mut self.remembered_ids, network.unique_id(), &path);
            }
            self.remembered_order.retain(|entry| entry != &path);
        }

        self.remembered_order.clear();
        for (path, properties) in snapshot {
            let Some(info) = properties.as_object() else {
                tracing::warn!(path = %path, "Remembered snapshot entry is not a dictionary");
                continue;
            };
            if !self.remembered.contains_key(path) {
                let kind = info
                    .get(keys::TYPE)
                    .and_then(Value::as_str)
                    .and_then(ConnectionKind::from_type_value);
                let Some(kind) = kind else {
                    tracing::warn!(path = %path, "Remembered snapshot entry has no usable type");
                    continue;
                };
                self.remembered
                    .insert(path.clone(), Box::new(Network::new(path.clone(), kind)));
            }
            let Some(network) = self.remembered.get_mut(path) else {
                continue;
            };
            let id_before = network.unique_id().to_string();
            network.parse_info(info, self.ip_query.as_ref());
            let id_after = network.unique_id().to_string();

            self.remembered_order.push(path.clone());
            reindex(&mut self.remembered_ids, &id_before, &id_after, path);
        }
        self.copy_remembered_credentials();
        self.notify(StateEvent::ServiceListChanged);
    }

    /// Reconcile the device registry against a full "Devices" snapshot.
    pub fn update_device_list(&mut self, snapshot: &[(String, Value)]) {
        if !self.on_owner_thread("update_device_list") {
            return;
        }
        let incoming: HashSet<&str> = snapshot.iter().map(|(path, _)| path.as_str()).collect();
        self.devices.retain(|path, _| incoming.contains(path.as_str()));

        self.device_order.clear();
        for (path, properties) in snapshot {
            let Some(info) = properties.as_object() else {
                tracing::warn!(path = %path, "Device snapshot entry is not a dictionary");
                continue;
            };
            if !self.devices.contains_key(path) {
                let kind = info
                    .get(keys::TYPE)
                    .and_then(Value::as_str)
                    .map(DeviceKind::from_type_value)
                    .unwrap_or(DeviceKind::Other);
                self.devices
                    .insert(path.clone(), Box::new(NetworkDevice::new(path.clone(), kind)));
            }
            if let Some(found) = self.devices.get_mut(path) {
                found.parse_info(info);
            }
            self.device_order.push(path.clone());
        }
        self.notify(StateEvent::DeviceListChanged);
        tracing::debug!(count = self.device_order.len(), "Device list reconciled");
    }

    fn remove_visible(&mut self, service_path: &str) {
        if let Some(network) = self.visible.remove(service_path) {
            remove_index_entry(&mut self.visible_ids, network.unique_id(), service_path);
        }
        self.visible_order.retain(|entry| entry != service_path);
    }

    // ---- User-initiated operations.

    /// Run a configuration closure against one visible service and the
    /// property sink, e.g. to set a passphrase or an APN.
    pub fn configure<R>(
        &mut self,
        service_path: &str,
        configure: impl FnOnce(&mut Network, &dyn PropertySink) -> R,
    ) -> Option<R> {
        if !self.on_owner_thread("configure") {
            return None;
        }
        let sink = Arc::clone(&self.sink);
        let network = self.visible.get_mut(service_path)?;
        Some(configure(network, sink.as_ref()))
    }

    /// Start a connection attempt. The returned ticket resolves once any
    /// required client certificate has been dealt with; the caller may
    /// cancel it if the user aborts.
    pub fn connect_network(
        &mut self,
        service_path: &str,
        on_ready: impl FnOnce() + Send + 'static,
    ) -> Option<ResolveTicket> {
        if !self.on_owner_thread("connect_network") {
            return None;
        }
        let sink = Arc::clone(&self.sink);
        let cert_store = self.cert_store.clone();
        let enrollment = self.enrollment.clone();
        let network = self.visible.get_mut(service_path)?;
        let ticket = ResolveTicket::new(on_ready);
        network.attempt_connection(
            sink.as_ref(),
            cert_store.as_deref(),
            enrollment.as_deref(),
            ticket.clone(),
        );
        Some(ticket)
    }

    /// Ask the stack to activate a cellular service.
    pub fn start_activation(&mut self, service_path: &str) -> bool {
        if !self.on_owner_thread("start_activation") {
            return false;
        }
        let sink = Arc::clone(&self.sink);
        match self.visible.get_mut(service_path) {
            Some(network) => network.start_activation(sink.as_ref()),
            None => false,
        }
    }

    /// Replace the cached data plans for a cellular service.
    pub fn update_data_plans(&mut self, service_path: &str, plans: Vec<CellularDataPlan>) {
        if !self.on_owner_thread("update_data_plans") {
            return;
        }
        let Some(network) = self.visible.get_mut(service_path) else {
            return;
        };
        network.update_data_plans(plans, Utc::now(), &self.plan_thresholds);
        self.notify(StateEvent::DataPlansUpdated {
            service_path: service_path.to_string(),
        });
    }

    /// Drop a service from the remembered registry and erase its
    /// credentials, including any visible counterpart's.
    pub fn forget_network(&mut self, service_path: &str) {
        if !self.on_owner_thread("forget_network") {
            return;
        }
        let mut unique_id = None;
        if let Some(mut network) = self.remembered.remove(service_path) {
            network.erase_credentials();
            unique_id = Some(network.unique_id().to_string());
            remove_index_entry(&mut self.remembered_ids, network.unique_id(), service_path);
        }
        self.remembered_order.retain(|entry| entry != service_path);

        // Wipe the visible counterpart too, whether addressed by the same
        // path or correlated via unique identity.
        if let Some(network) = self.visible.get_mut(service_path) {
            network.erase_credentials();
            unique_id.get_or_insert_with(|| network.unique_id().to_string());
        }
        if let Some(unique_id) = unique_id {
            if let Some(visible_path) = self.visible_ids.get(&unique_id).cloned() {
                if let Some(network) = self.visible.get_mut(&visible_path) {
                    network.erase_credentials();
                }
            }
        }
        tracing::info!(path = %service_path, "Forgot network");
    }

    /// Logout sweep: overwrite and clear every credential field on every
    /// tracked service.
    pub fn erase_all_credentials(&mut self) {
        if !self.on_owner_thread("erase_all_credentials") {
            return;
        }
        for network in self.visible.values_mut() {
            network.erase_credentials();
        }
        for network in self.remembered.values_mut() {
            network.erase_credentials();
        }
        tracing::info!("Erased credentials on all tracked services");
    }
}

/// Move a unique-id index entry after an identity change. Only entries that
/// still point at this service are removed, so a colliding service keeps its
/// mapping.
fn reindex(
    index: &mut HashMap<String, String>,
    id_before: &str,
    id_after: &str,
    service_path: &str,
) {
    if id_before != id_after {
        remove_index_entry(index, id_before, service_path);
    }
    if !id_after.is_empty() {
        index.insert(id_after.to_string(), service_path.to_string());
    }
}

fn remove_index_entry(index: &mut HashMap<String, String>, unique_id: &str, service_path: &str) {
    if index.get(unique_id).map(String::as_str) == Some(service_path) {
        index.remove(unique_id);
    }
}
