/// MarketLink - marketplace client core
///
/// Authenticated REST pipeline with single-flight credential renewal, and
/// per-conversation realtime chat channels with optimistic sends.

pub mod error;
pub mod config;
pub mod credential_store;
pub mod session;
pub mod api;
pub mod chat_types;
pub mod message_store;
pub mod realtime;
pub mod cli_app;

pub use error::{ClientError, Result};
pub use config::ClientConfig;
pub use credential_store::{Credential, CredentialStore, MemoryCredentialStore, SledCredentialStore};
pub use api::{ApiClient, ApiRequest};
pub use realtime::{ConversationChannel, SendOutcome, WebSocketConnector};
