/// Error types for the marketplace client
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No response was received at all
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// Authorization failure that must not start a renewal (login, renewal
    /// endpoint, or a request that was already retried once)
    #[error("Unauthorized: {body}")]
    Unauthorized { body: String },

    /// Credential could not be renewed; the store has been cleared
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClientError {
    /// True when the user has to log in again
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, ClientError::SessionExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
