#![allow(dead_code)]
// Scripted transports shared by the integration tests

use async_trait::async_trait;
use http::{Method, StatusCode};
use marketlink_core::api::{HttpRequest, HttpResponse, HttpTransport};
use marketlink_core::realtime::{PushConnector, PushEvent, PushLink};
use marketlink_core::{ApiClient, ClientConfig, ClientError, Credential, MemoryCredentialStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const BASE_URL: &str = "http://api.test/api";

/// In-memory marketplace backend.
///
/// Ordinary endpoints accept only the bearer in `valid_access`; the renewal
/// endpoint swaps it for `next_access` after `refresh_delay`.
pub struct FakeBackend {
    pub valid_access: Mutex<String>,
    pub next_access: String,
    pub refresh_status: StatusCode,
    pub refresh_delay: Duration,
    /// Reject ordinary endpoints even with a valid bearer
    pub always_unauthorized: bool,
    pub refresh_calls: AtomicUsize,
    pub requests: Mutex<Vec<HttpRequest>>,
    pub history: Mutex<Vec<Value>>,
    pub history_served: AtomicBool,
    next_id: AtomicI64,
}

impl FakeBackend {
    pub fn new(valid_access: &str, next_access: &str) -> Self {
        Self {
            valid_access: Mutex::new(valid_access.to_string()),
            next_access: next_access.to_string(),
            refresh_status: StatusCode::OK,
            refresh_delay: Duration::from_millis(50),
            always_unauthorized: false,
            refresh_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            history_served: AtomicBool::new(false),
            next_id: AtomicI64::new(100),
        }
    }

    pub fn with_history(self, history: Vec<Value>) -> Self {
        *self.history.lock().unwrap() = history;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Recorded requests whose URL ends with `suffix`
    pub fn requests_to(&self, method: Method, suffix: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(suffix))
            .cloned()
            .collect()
    }

    fn authorized(&self, request: &HttpRequest) -> bool {
        let valid = self.valid_access.lock().unwrap().clone();
        !self.always_unauthorized && request.bearer.as_deref() == Some(valid.as_str())
    }
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> marketlink_core::Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let url = request.url.clone();

        if url.ends_with("/token/refresh/") {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.refresh_delay).await;
            if !self.refresh_status.is_success() {
                return Ok(HttpResponse::json(
                    self.refresh_status,
                    &json!({ "detail": "Token is invalid or expired" }),
                ));
            }
            *self.valid_access.lock().unwrap() = self.next_access.clone();
            return Ok(HttpResponse::json(
                StatusCode::OK,
                &json!({ "access": self.next_access }),
            ));
        }

        if url.ends_with("/login/") {
            let body = request.body.unwrap_or_default();
            if body["username"] == "ana" && body["password"] == "secret" {
                *self.valid_access.lock().unwrap() = "a1".to_string();
                return Ok(HttpResponse::json(
                    StatusCode::OK,
                    &json!({ "access": "a1", "refresh": "r1", "user": { "username": "ana" } }),
                ));
            }
            return Ok(HttpResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({ "detail": "No active account found" }),
            ));
        }

        if url.ends_with("/register/") {
            let body = request.body.unwrap_or_default();
            if body["username"] == "ana" {
                return Ok(HttpResponse::json(
                    StatusCode::BAD_REQUEST,
                    &json!({ "username": ["A user with that username already exists."] }),
                ));
            }
            return Ok(HttpResponse::json(
                StatusCode::CREATED,
                &json!({
                    "id": self.next_id.fetch_add(1, Ordering::SeqCst),
                    "username": body["username"],
                    "email": body["email"],
                }),
            ));
        }

        if url.ends_with("/down/") {
            return Err(ClientError::Network("connection refused".to_string()));
        }

        if !self.authorized(&request) {
            return Ok(HttpResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({ "code": "token_not_valid" }),
            ));
        }

        if url.ends_with("/boom/") {
            return Ok(HttpResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "detail": "server error" }),
            ));
        }

        if url.ends_with("/me/") {
            return Ok(HttpResponse::json(StatusCode::OK, &json!({ "username": "ana" })));
        }

        if url.ends_with("/messages/") && request.method == Method::GET {
            let history = Value::Array(self.history.lock().unwrap().clone());
            self.history_served.store(true, Ordering::SeqCst);
            return Ok(HttpResponse::json(StatusCode::OK, &history));
        }

        if url.ends_with("/messages/") && request.method == Method::POST {
            let content = request
                .body
                .as_ref()
                .and_then(|b| b["content"].as_str())
                .unwrap_or_default()
                .to_string();
            let message = wire_message(self.next_id.fetch_add(1, Ordering::SeqCst), None, &content);
            self.history.lock().unwrap().push(message.clone());
            return Ok(HttpResponse::json(StatusCode::CREATED, &message));
        }

        Ok(HttpResponse::json(StatusCode::NOT_FOUND, &json!({ "detail": "not found" })))
    }
}

pub fn wire_message(id: i64, client_temp_id: Option<&str>, content: &str) -> Value {
    let mut message = json!({
        "id": id,
        "content": content,
        "sender_display_name": "ana",
        "created_at": "2025-03-01T10:00:00Z",
    });
    if let Some(temp) = client_temp_id {
        message["client_temp_id"] = json!(temp);
    }
    message
}

pub fn client(
    backend: &Arc<FakeBackend>,
    credential: Option<Credential>,
) -> (ApiClient, Arc<MemoryCredentialStore>) {
    let store = Arc::new(match credential {
        Some(c) => MemoryCredentialStore::with_credential(c),
        None => MemoryCredentialStore::new(),
    });
    let config = ClientConfig::new(BASE_URL).unwrap();
    let api = ApiClient::with_transport(config, backend.clone(), store.clone());
    (api, store)
}

/// Test-side ends of a fake push connection
pub struct FakeSocket {
    pub to_client: mpsc::Sender<PushEvent>,
    pub from_client: mpsc::Receiver<String>,
}

pub struct FakeConnector {
    pub fail: bool,
    pub urls: Mutex<Vec<String>>,
    /// Whether the history had been served when the handshake started
    pub history_before_connect: Mutex<Option<bool>>,
    backend: Arc<FakeBackend>,
    socket: Mutex<Option<FakeSocket>>,
}

impl FakeConnector {
    pub fn new(backend: &Arc<FakeBackend>) -> Self {
        Self {
            fail: false,
            urls: Mutex::new(Vec::new()),
            history_before_connect: Mutex::new(None),
            backend: backend.clone(),
            socket: Mutex::new(None),
        }
    }

    pub fn failing(backend: &Arc<FakeBackend>) -> Self {
        Self {
            fail: true,
            ..Self::new(backend)
        }
    }

    pub fn take_socket(&self) -> FakeSocket {
        self.socket.lock().unwrap().take().expect("no open socket")
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, url: &str) -> marketlink_core::Result<PushLink> {
        self.urls.lock().unwrap().push(url.to_string());
        *self.history_before_connect.lock().unwrap() =
            Some(self.backend.history_served.load(Ordering::SeqCst));

        if self.fail {
            return Err(ClientError::Channel("handshake refused".to_string()));
        }

        let (outbound, from_client) = mpsc::channel(16);
        let (to_client, inbound) = mpsc::channel(16);
        *self.socket.lock().unwrap() = Some(FakeSocket {
            to_client,
            from_client,
        });
        Ok(PushLink { outbound, inbound })
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
