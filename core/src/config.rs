/// Configuration management
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_API_URL: &str = "MARKETLINK_API_URL";
pub const ENV_WS_HOST: &str = "MARKETLINK_WS_HOST";
pub const ENV_DATA_DIR: &str = "MARKETLINK_DATA_DIR";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "MARKETLINK_REQUEST_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "MARKETLINK_CONNECT_TIMEOUT_MS";

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_DATA_DIR: &str = ".marketlink";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST base URL, normalized without a trailing slash
    pub api_base_url: String,

    /// Host (and optional port) serving the chat sockets
    pub ws_host: String,

    /// Use `wss://` instead of `ws://`
    pub ws_secure: bool,

    /// Per-request timeout for REST calls, including the renewal call
    pub request_timeout: Duration,

    /// Timeout for the push transport handshake
    pub connect_timeout: Duration,

    /// Directory holding the persisted credential pair
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_host: "127.0.0.1:8000".to_string(),
            ws_secure: false,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl ClientConfig {
    /// Build a config for the given API base URL; the socket host and scheme
    /// follow the API URL.
    pub fn new(api_base_url: &str) -> Result<Self> {
        let api_base_url = normalize_base_url(api_base_url)?;
        let ws_host = host_of(&api_base_url)?;
        let ws_secure = api_base_url.starts_with("https://");

        Ok(Self {
            api_base_url,
            ws_host,
            ws_secure,
            ..Default::default()
        })
    }

    /// Create config from the environment
    pub fn from_env() -> Result<Self> {
        let api_url = env_non_empty(ENV_API_URL).ok_or_else(|| {
            ClientError::Config(format!("{} must be set to the REST base URL", ENV_API_URL))
        })?;
        let mut config = Self::new(&api_url)?;

        if let Some(host) = env_non_empty(ENV_WS_HOST) {
            config.ws_host = host;
        }
        if let Some(dir) = env_non_empty(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_millis(ENV_REQUEST_TIMEOUT_MS)? {
            config.request_timeout = ms;
        }
        if let Some(ms) = env_millis(ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = ms;
        }

        Ok(config)
    }

    /// Absolute URL for an API path such as `/login/`
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.api_base_url, path)
        } else {
            format!("{}/{}", self.api_base_url, path)
        }
    }

    /// Chat socket address for one conversation. The access credential rides
    /// in the query string because the handshake cannot carry headers.
    pub fn chat_url(&self, conversation_id: u64, access: &str) -> String {
        self.socket_url(&format!("/ws/chat/{}/", conversation_id), access)
    }

    /// Per-user notification socket address
    pub fn notifications_url(&self, access: &str) -> String {
        self.socket_url("/ws/notifications/", access)
    }

    fn socket_url(&self, path: &str, access: &str) -> String {
        let scheme = if self.ws_secure { "wss" } else { "ws" };
        format!(
            "{}://{}{}?token={}",
            scheme,
            self.ws_host,
            path,
            urlencoding::encode(access)
        )
    }
}

/// Trim, drop the trailing slash, and require an http(s) scheme with a host.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::Config("base url must not be empty".to_string()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::Config(
            "base url must use http:// or https://".to_string(),
        ));
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ClientError::Config("base url is missing a host".to_string()));
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ClientError::Config("base url is missing a host".to_string()));
    }
    Ok(trimmed.to_string())
}

fn host_of(base_url: &str) -> Result<String> {
    let remainder = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| ClientError::Config("base url is missing a scheme".to_string()))?;
    let host = remainder.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(ClientError::Config("base url is missing a host".to_string()));
    }
    Ok(host.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    env_non_empty(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ClientError::Config(format!("{} must be a number of milliseconds", key)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        let normalized = normalize_base_url(" https://market.example.com/api/ ").unwrap();
        assert_eq!(normalized, "https://market.example.com/api");

        assert!(normalize_base_url("market.example.com").is_err());
        assert!(normalize_base_url("https:///api").is_err());
        assert!(normalize_base_url("   ").is_err());
    }

    #[test]
    fn test_socket_follows_api_scheme_and_host() {
        let config = ClientConfig::new("https://market.example.com:8443/api/").unwrap();
        assert_eq!(config.ws_host, "market.example.com:8443");
        assert!(config.ws_secure);

        let plain = ClientConfig::new("http://localhost:8000").unwrap();
        assert_eq!(plain.ws_host, "localhost:8000");
        assert!(!plain.ws_secure);
    }

    #[test]
    fn test_chat_url_carries_encoded_token() {
        let config = ClientConfig::new("https://market.example.com/api").unwrap();
        let url = config.chat_url(17, "abc.def+ghi=");
        assert_eq!(
            url,
            "wss://market.example.com/ws/chat/17/?token=abc.def%2Bghi%3D"
        );
    }

    #[test]
    fn test_notifications_url_shares_socket_host() {
        let mut config = ClientConfig::new("http://localhost:8000/api").unwrap();
        config.ws_host = "push.local:9000".to_string();
        assert_eq!(
            config.notifications_url("tok"),
            "ws://push.local:9000/ws/notifications/?token=tok"
        );
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = ClientConfig::new("http://localhost:8000/api").unwrap();
        assert_eq!(config.endpoint("/login/"), "http://localhost:8000/api/login/");
        assert_eq!(config.endpoint("me/"), "http://localhost:8000/api/me/");
    }
}
