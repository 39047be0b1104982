/// Session lifecycle notifications for the application layer
use serde::{Deserialize, Serialize};

/// Broadcast whenever the stored session changes. `Expired` is the signal to
/// route the user back to the login screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Credentials were stored after a successful login
    LoggedIn { username: String },
    /// The access credential was renewed in the background
    Renewed,
    /// The user logged out locally
    LoggedOut,
    /// Renewal was impossible; the credential store has been cleared
    Expired { reason: String },
}

pub(crate) const SESSION_EVENT_CAPACITY: usize = 16;
