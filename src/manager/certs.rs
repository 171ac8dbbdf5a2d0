//! Client certificate selection
//!
//! 802.1X wifi and certificate VPNs can be configured with a *pattern*
//! instead of a concrete certificate id. Before a connection attempt the
//! pattern is resolved against the certificate store; a miss optionally
//! hands off to an enrollment flow that may finish much later, or never.

use std::sync::{Arc, Mutex};

/// Matching criteria for one certificate name (issuer or subject). Empty
/// fields match anything; a non-empty field must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerSubjectPattern {
    pub common_name: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl IssuerSubjectPattern {
    pub fn is_empty(&self) -> bool {
        self.common_name.is_empty()
            && self.locality.is_empty()
            && self.organization.is_empty()
            && self.organizational_unit.is_empty()
    }

    /// Whether a concrete certificate name satisfies this pattern.
    pub fn matches(&self, name: &CertificateName) -> bool {
        (self.common_name.is_empty() || self.common_name == name.common_name)
            && (self.locality.is_empty() || self.locality == name.locality)
            && (self.organization.is_empty() || self.organization == name.organization)
            && (self.organizational_unit.is_empty()
                || self.organizational_unit == name.organizational_unit)
    }
}

/// Concrete name fields of a certificate in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateName {
    pub common_name: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

/// Criteria for selecting a client certificate without hardcoding its id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificatePattern {
    pub issuer: IssuerSubjectPattern,
    pub subject: IssuerSubjectPattern,
    /// Where to send the user if no matching certificate is installed.
    pub enrollment_uris: Vec<String>,
}

impl CertificatePattern {
    /// A pattern with no matching criteria. Enrollment URIs alone do not
    /// make a pattern matchable.
    pub fn is_empty(&self) -> bool {
        self.issuer.is_empty() && self.subject.is_empty()
    }
}

/// How a service selects its client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClientCertMode {
    #[default]
    None,
    /// A concrete store identifier, configured directly.
    Reference(String),
    /// Resolve against the store at connect time.
    Pattern(CertificatePattern),
}

/// Opaque handle to a certificate found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHandle {
    pub pkcs11_id: String,
}

/// Certificate store collaborator.
pub trait CertificateStore: Send + Sync {
    fn find_match(&self, pattern: &CertificatePattern) -> Option<CertificateHandle>;

    /// Store-specific identifier written into the service configuration.
    fn id_of(&self, handle: &CertificateHandle) -> String {
        handle.pkcs11_id.clone()
    }
}

/// Enrollment flow collaborator. Fire-and-forget from the manager's point of
/// view: once `enroll` is called the handler is the sole owner of the ticket.
pub trait EnrollmentHandler: Send + Sync {
    fn enroll(&self, enrollment_uris: &[String], ticket: ResolveTicket);
}

enum TicketState {
    Armed(Box<dyn FnOnce() + Send>),
    Completed,
    Cancelled,
}

/// Single-fire continuation for a connection attempt.
///
/// The ticket may be completed at most once, from any thread, after an
/// arbitrary delay. Completing twice is a programming error and is guarded
/// against rather than re-entering the continuation. Cancelling disarms the
/// ticket so a late completion from an abandoned enrollment flow is ignored.
#[derive(Clone)]
pub struct ResolveTicket {
    state: Arc<Mutex<TicketState>>,
}

impl ResolveTicket {
    pub fn new(on_resolved: impl FnOnce() + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(TicketState::Armed(Box::new(on_resolved)))),
        }
    }

    /// Run the continuation if the ticket is still armed.
    pub fn complete(&self) {
        let continuation = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, TicketState::Completed) {
                TicketState::Armed(f) => Some(f),
                TicketState::Completed => {
                    tracing::error!("Connect continuation completed more than once");
                    None
                }
                TicketState::Cancelled => {
                    *state = TicketState::Cancelled;
                    tracing::debug!("Ignoring completion of cancelled connect continuation");
                    None
                }
            }
        };
        if let Some(f) = continuation {
            f();
        }
    }

    /// Disarm the ticket without running the continuation.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, TicketState::Armed(_)) {
            *state = TicketState::Cancelled;
        }
    }

    pub fn is_spent(&self) -> bool {
        !matches!(*self.state.lock().unwrap(), TicketState::Armed(_))
    }
}

impl std::fmt::Debug for ResolveTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock().unwrap() {
            TicketState::Armed(_) => "armed",
            TicketState::Completed => "completed",
            TicketState::Cancelled => "cancelled",
        };
        f.debug_struct("ResolveTicket").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_ticket() -> (ResolveTicket, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in = fired.clone();
        let ticket = ResolveTicket::new(move || {
            fired_in.fetch_add(1, Ordering::SeqCst);
        });
        (ticket, fired)
    }

    #[test]
    fn test_ticket_fires_once() {
        let (ticket, fired) = counting_ticket();
        assert!(!ticket.is_spent());
        ticket.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(ticket.is_spent());

        // Second completion is guarded, not re-entered.
        ticket.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_ticket_never_fires() {
        let (ticket, fired) = counting_ticket();
        ticket.cancel();
        ticket.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(ticket.is_spent());
    }

    #[tokio::test]
    async fn test_ticket_completes_from_another_task() {
        let (ticket, fired) = counting_ticket();
        let handed_off = ticket.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            handed_off.complete();
        });
        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = IssuerSubjectPattern {
            organization: "Example Corp".to_string(),
            ..Default::default()
        };
        let mut name = CertificateName {
            common_name: "client-17".to_string(),
            organization: "Example Corp".to_string(),
            ..Default::default()
        };
        assert!(pattern.matches(&name));
        name.organization = "Other Corp".to_string();
        assert!(!pattern.matches(&name));
    }

    #[test]
    fn test_empty_pattern() {
        let mut pattern = CertificatePattern::default();
        assert!(pattern.is_empty());
        pattern.enrollment_uris.push("https://enroll.example".to_string());
        assert!(pattern.is_empty());
        pattern.subject.common_name = "client".to_string();
        assert!(!pattern.is_empty());
    }
}
