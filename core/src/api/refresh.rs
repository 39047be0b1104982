/// Single-flight credential renewal.
///
/// At most one renewal request is on the wire at any time. Callers that hit
/// an authorization failure while a renewal is running are queued and resumed
/// in arrival order with the outcome of that one renewal.
use crate::api::transport::{HttpRequest, HttpTransport};
use crate::credential_store::{Credential, CredentialStore};
use crate::session::SessionEvent;
use http::{Method, StatusCode};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

/// Renewal endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/token/refresh/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    #[error("no refresh credential available")]
    MissingRefreshCredential,

    #[error("renewal rejected with HTTP {status}")]
    Rejected { status: StatusCode },

    #[error("renewal request failed: {0}")]
    Network(String),

    #[error("renewal response unreadable: {0}")]
    Decode(String),

    /// The caller driving the renewal was cancelled before it settled
    #[error("renewal abandoned before it settled")]
    Abandoned,
}

impl RenewalError {
    /// Terminal failures clear the session; an abandoned renewal does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenewalError::Abandoned)
    }
}

type RenewalOutcome = std::result::Result<String, RenewalError>;

/// A caller suspended until the in-flight renewal settles
struct PendingCall {
    resume: oneshot::Sender<RenewalOutcome>,
}

enum RefreshState {
    Idle,
    InFlight(VecDeque<PendingCall>),
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present when the server rotates refresh credentials
    #[serde(default)]
    refresh: Option<String>,
}

/// Role a caller takes after the check-then-set on the shared state
enum Role {
    Reuse(String),
    Wait(oneshot::Receiver<RenewalOutcome>),
    Lead(String),
    Fail(RenewalError),
}

pub struct RefreshCoordinator {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        endpoint: String,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            credentials,
            events,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// True while a renewal request is on the wire
    pub fn is_renewing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::InFlight(_))
    }

    /// Obtain a renewed access credential.
    ///
    /// `rejected_access` is the credential the failed request carried. If the
    /// store already holds a different one, an earlier renewal has finished
    /// and that credential is handed back without another network call.
    pub async fn renew(&self, rejected_access: Option<&str>) -> RenewalOutcome {
        match self.claim(rejected_access) {
            Role::Reuse(access) => {
                debug!("Credential already renewed by an earlier caller");
                Ok(access)
            }
            Role::Wait(resume) => resume.await.unwrap_or(Err(RenewalError::Abandoned)),
            Role::Fail(e) => Err(e),
            Role::Lead(refresh) => {
                let mut guard = LeaderGuard {
                    state: &self.state,
                    armed: true,
                };
                let outcome = self.perform(&refresh).await;
                guard.armed = false;
                self.settle(&outcome);
                outcome
            }
        }
    }

    /// Check-then-set on the shared state. Nothing in here awaits, so no other
    /// caller can observe the state between the check and the transition.
    fn claim(&self, rejected_access: Option<&str>) -> Role {
        let mut state = self.lock_state();
        let current = self.credentials.get();

        if let (Some(rejected), Some(current)) = (rejected_access, current.as_ref()) {
            if rejected != current.access {
                return Role::Reuse(current.access.clone());
            }
        }

        match &mut *state {
            RefreshState::InFlight(queue) => {
                let (resume, wait) = oneshot::channel();
                queue.push_back(PendingCall { resume });
                debug!("Renewal in flight, queued caller ({} waiting)", queue.len());
                Role::Wait(wait)
            }
            RefreshState::Idle => match current {
                Some(Credential {
                    refresh: Some(refresh),
                    ..
                }) => {
                    *state = RefreshState::InFlight(VecDeque::new());
                    Role::Lead(refresh)
                }
                Some(_) => {
                    warn!("Authorization failed and no refresh credential is stored");
                    self.expire(&RenewalError::MissingRefreshCredential);
                    Role::Fail(RenewalError::MissingRefreshCredential)
                }
                // Already logged out; nothing left to clear.
                None => Role::Fail(RenewalError::MissingRefreshCredential),
            },
        }
    }

    async fn perform(&self, refresh: &str) -> RenewalOutcome {
        info!("Renewing access credential");

        let request = HttpRequest {
            method: Method::POST,
            url: self.endpoint.clone(),
            bearer: None,
            body: Some(serde_json::json!({ "refresh": refresh })),
        };

        let outcome = match self.transport.execute(request).await {
            Ok(response) if response.status.is_success() => {
                serde_json::from_slice::<RefreshResponse>(&response.body)
                    .map_err(|e| RenewalError::Decode(e.to_string()))
            }
            Ok(response) => Err(RenewalError::Rejected {
                status: response.status,
            }),
            Err(e) => Err(RenewalError::Network(e.to_string())),
        };

        match outcome {
            Ok(renewed) => {
                let credential = Credential {
                    access: renewed.access,
                    refresh: renewed.refresh.or_else(|| Some(refresh.to_string())),
                };
                if let Err(e) = self.credentials.set(&credential) {
                    error!("Failed to persist renewed credential: {}", e);
                }
                let _ = self.events.send(SessionEvent::Renewed);
                info!("Access credential renewed");
                Ok(credential.access)
            }
            Err(e) => {
                warn!("Credential renewal failed: {}", e);
                self.expire(&e);
                Err(e)
            }
        }
    }

    /// Resume every queued caller, in arrival order, and go back to idle.
    fn settle(&self, outcome: &RenewalOutcome) {
        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::InFlight(queue) => queue,
                RefreshState::Idle => VecDeque::new(),
            }
        };

        debug!("Renewal settled, resuming {} queued callers", waiters.len());
        for call in waiters {
            let _ = call.resume.send(outcome.clone());
        }
    }

    fn expire(&self, reason: &RenewalError) {
        if let Err(e) = self.credentials.clear() {
            error!("Failed to clear credential store: {}", e);
        }
        let _ = self.events.send(SessionEvent::Expired {
            reason: reason.to_string(),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resets the state if the leading caller is dropped mid-renewal. Dropping the
/// queue wakes every waiter with `Abandoned`.
struct LeaderGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *state = RefreshState::Idle;
        }
    }
}
