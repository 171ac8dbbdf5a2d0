//! In-process stand-ins for the external stack
//!
//! Used by the demo binary and the unit tests in place of a live transport:
//! a recording property sink, a canned IP-config source, a searchable
//! certificate store and an enrollment handler that parks tickets until the
//! caller releases them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use super::certs::{
    CertificateHandle, CertificateName, CertificatePattern, CertificateStore, EnrollmentHandler,
    ResolveTicket,
};
use super::transport::{IpConfig, IpConfigQuery, PropertySink};

/// One operation recorded by [`StubSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Set { path: String, key: String, value: Value },
    Clear { path: String, key: String },
    Activate { path: String },
}

/// Property sink that records every write instead of talking to a stack.
#[derive(Debug)]
pub struct StubSink {
    ready: AtomicBool,
    accept_activation: AtomicBool,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl Default for StubSink {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            accept_activation: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
        }
    }
}

impl StubSink {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_accept_activation(&self, accept: bool) {
        self.accept_activation.store(accept, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }
}

impl PropertySink for StubSink {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_property(&self, service_path: &str, key: &str, value: Value) {
        self.writes.lock().unwrap().push(RecordedWrite::Set {
            path: service_path.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn clear_property(&self, service_path: &str, key: &str) {
        self.writes.lock().unwrap().push(RecordedWrite::Clear {
            path: service_path.to_string(),
            key: key.to_string(),
        });
    }

    fn request_activation(&self, service_path: &str) -> bool {
        self.writes.lock().unwrap().push(RecordedWrite::Activate {
            path: service_path.to_string(),
        });
        self.accept_activation.load(Ordering::SeqCst)
    }
}

/// Canned IP assignments, keyed by device path.
#[derive(Debug, Default)]
pub struct StubIpQuery {
    configs: Mutex<HashMap<String, IpConfig>>,
}

impl StubIpQuery {
    pub fn insert(&self, device_path: &str, config: IpConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert(device_path.to_string(), config);
    }

    pub fn remove(&self, device_path: &str) {
        self.configs.lock().unwrap().remove(device_path);
    }
}

impl IpConfigQuery for StubIpQuery {
    fn current_config(&self, device_path: &str) -> Option<IpConfig> {
        self.configs.lock().unwrap().get(device_path).cloned()
    }
}

struct StubCert {
    name: CertificateName,
    pkcs11_id: String,
}

/// Certificate store backed by an in-memory list. Counts queries so tests
/// can assert that an empty pattern never reaches the store.
#[derive(Default)]
pub struct StubCertStore {
    certs: Mutex<Vec<StubCert>>,
    queries: AtomicUsize,
}

impl StubCertStore {
    pub fn install(&self, common_name: &str, organization: &str, pkcs11_id: &str) {
        self.certs.lock().unwrap().push(StubCert {
            name: CertificateName {
                common_name: common_name.to_string(),
                organization: organization.to_string(),
                ..Default::default()
            },
            pkcs11_id: pkcs11_id.to_string(),
        });
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl CertificateStore for StubCertStore {
    fn find_match(&self, pattern: &CertificatePattern) -> Option<CertificateHandle> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let certs = self.certs.lock().unwrap();
        certs
            .iter()
            .find(|cert| pattern.issuer.matches(&cert.name) && pattern.subject.matches(&cert.name))
            .map(|cert| CertificateHandle {
                pkcs11_id: cert.pkcs11_id.clone(),
            })
    }
}

/// Enrollment handler that parks every delegated ticket. Tests and the demo
/// decide when (or whether) the "user" finishes enrolling.
#[derive(Default)]
pub struct StubEnrollment {
    pending: Mutex<Vec<(Vec<String>, ResolveTicket)>>,
}

impl StubEnrollment {
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Complete every parked ticket, as if the user finished enrollment.
    pub fn complete_all(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (_, ticket) in pending {
            ticket.complete();
        }
    }

    /// Cancel every parked ticket, as if the user abandoned enrollment.
    pub fn cancel_all(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (_, ticket) in pending {
            ticket.cancel();
        }
    }
}

impl EnrollmentHandler for StubEnrollment {
    fn enroll(&self, enrollment_uris: &[String], ticket: ResolveTicket) {
        tracing::debug!(uris = ?enrollment_uris, "Enrollment requested");
        self.pending
            .lock()
            .unwrap()
            .push((enrollment_uris.to_vec(), ticket));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_sink_records_in_order() {
        let sink = StubSink::default();
        sink.set_property("/service/a", "Name", Value::String("A".to_string()));
        sink.clear_property("/service/a", "Priority");
        assert_eq!(
            sink.writes(),
            vec![
                RecordedWrite::Set {
                    path: "/service/a".to_string(),
                    key: "Name".to_string(),
                    value: Value::String("A".to_string()),
                },
                RecordedWrite::Clear {
                    path: "/service/a".to_string(),
                    key: "Priority".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_cancelled_enrollment_never_resolves() {
        use std::sync::Arc;

        let enrollment = StubEnrollment::default();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in = fired.clone();
        let ticket = ResolveTicket::new(move || fired_in.store(true, Ordering::SeqCst));

        enrollment.enroll(&["https://enroll.example".to_string()], ticket);
        enrollment.cancel_all();
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(enrollment.pending_count(), 0);
    }
}
