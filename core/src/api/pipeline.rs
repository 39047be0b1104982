/// Authenticated request pipeline.
///
/// Every call carries the stored access credential. A 401 on an ordinary
/// endpoint is recovered by one shared renewal and exactly one replay of the
/// original request; everything else is normalized into `ClientError`.
use crate::api::refresh::{RefreshCoordinator, RenewalError, REFRESH_PATH};
use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::chat_types::{Message, NewMessage, WireMessage};
use crate::config::ClientConfig;
use crate::credential_store::{Credential, CredentialStore};
use crate::error::{ClientError, Result};
use crate::session::{SessionEvent, SESSION_EVENT_CAPACITY};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/login/";
pub const REGISTER_PATH: &str = "/register/";
pub const PROFILE_PATH: &str = "/me/";

/// Endpoints whose 401 means "bad credentials", never "renew and retry"
const RENEWAL_EXEMPT: [&str; 2] = [LOGIN_PATH, REFRESH_PATH];

/// An API call relative to the configured base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Set on the single replay after a renewal; a replay never renews again
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }

    fn into_retry(mut self) -> Self {
        self.retried = true;
        self
    }

    fn renewal_exempt(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        RENEWAL_EXEMPT.contains(&path)
    }
}

/// Classified result of one dispatch
enum Outcome {
    Success(HttpResponse),
    /// 401 that may be recovered by renewing the credential
    Renewable,
    /// 401 that must be surfaced as-is
    Unauthorized(HttpResponse),
    Failed(HttpResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// Marketplace REST client
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    session_events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    /// Client over reqwest with the given credential store
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Ok(Self::with_transport(config, transport, credentials))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (session_events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let refresher = Arc::new(RefreshCoordinator::new(
            config.endpoint(REFRESH_PATH),
            transport.clone(),
            credentials.clone(),
            session_events.clone(),
        ));

        Self {
            config: Arc::new(config),
            transport,
            credentials,
            refresher,
            session_events,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Current access credential, if logged in
    pub fn access_token(&self) -> Option<String> {
        self.credentials.get().map(|c| c.access)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.get().is_some()
    }

    /// Subscribe to login/renewal/expiry notifications
    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    /// Send a request, renewing the credential and replaying once on a 401.
    /// Returns the response only for 2xx statuses.
    pub async fn send(&self, request: ApiRequest) -> Result<HttpResponse> {
        let access = self.access_token();
        let response = self.dispatch(&request, access.clone()).await?;

        match self.classify(&request, response) {
            Outcome::Success(response) => Ok(response),
            Outcome::Unauthorized(response) => Err(unauthorized(response)),
            Outcome::Failed(response) => Err(http_error(response)),
            Outcome::Renewable => {
                debug!("{} {} rejected, renewing credential", request.method, request.path);
                let renewed = self
                    .refresher
                    .renew(access.as_deref())
                    .await
                    .map_err(renewal_error)?;

                let retry = request.into_retry();
                let response = self.dispatch(&retry, Some(renewed)).await?;
                match self.classify(&retry, response) {
                    Outcome::Success(response) => Ok(response),
                    Outcome::Unauthorized(response) => {
                        warn!("{} {} rejected again after renewal", retry.method, retry.path);
                        Err(unauthorized(response))
                    }
                    Outcome::Failed(response) => Err(http_error(response)),
                    Outcome::Renewable => Err(ClientError::Unauthorized {
                        body: "rejected after renewal".to_string(),
                    }),
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(ApiRequest::get(path)).await?;
        decode(&response)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let response = self.send(ApiRequest::post(path, body)).await?;
        decode(&response)
    }

    /// Log in and store the returned credential pair
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::json!({ "username": username, "password": password });
        let login: LoginResponse = self.post_json(LOGIN_PATH, &body).await?;

        self.credentials
            .set(&Credential::new(login.access.clone(), login.refresh.clone()))?;
        let _ = self.session_events.send(SessionEvent::LoggedIn {
            username: username.to_string(),
        });
        info!("Logged in as {}", username);
        Ok(login)
    }

    pub async fn register(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        self.post_json(REGISTER_PATH, payload).await
    }

    /// Forget the stored session locally
    pub fn logout(&self) -> Result<()> {
        self.credentials.clear()?;
        let _ = self.session_events.send(SessionEvent::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    /// Profile of the logged-in user
    pub async fn profile(&self) -> Result<serde_json::Value> {
        self.get_json(PROFILE_PATH).await
    }

    /// Full ordered history of one conversation
    pub async fn get_messages(&self, conversation_id: u64) -> Result<Vec<Message>> {
        let wire: Vec<WireMessage> = self.get_json(&messages_path(conversation_id)).await?;
        Ok(wire.into_iter().map(Message::from).collect())
    }

    /// Post a message over REST; returns the server-confirmed message
    pub async fn post_message(&self, conversation_id: u64, content: &str) -> Result<Message> {
        let body = NewMessage {
            content: content.to_string(),
        };
        let wire: WireMessage = self.post_json(&messages_path(conversation_id), &body).await?;
        Ok(Message::from(wire))
    }

    async fn dispatch(&self, request: &ApiRequest, bearer: Option<String>) -> Result<HttpResponse> {
        self.transport
            .execute(HttpRequest {
                method: request.method.clone(),
                url: self.config.endpoint(&request.path),
                bearer,
                body: request.body.clone(),
            })
            .await
    }

    fn classify(&self, request: &ApiRequest, response: HttpResponse) -> Outcome {
        if response.status.is_success() {
            return Outcome::Success(response);
        }
        if response.status != StatusCode::UNAUTHORIZED {
            return Outcome::Failed(response);
        }
        if request.is_retry() || request.renewal_exempt() {
            Outcome::Unauthorized(response)
        } else {
            Outcome::Renewable
        }
    }
}

fn messages_path(conversation_id: u64) -> String {
    format!("/request/{}/messages/", conversation_id)
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(ClientError::Serialization)
}

fn unauthorized(response: HttpResponse) -> ClientError {
    ClientError::Unauthorized {
        body: response.body_text(),
    }
}

fn http_error(response: HttpResponse) -> ClientError {
    ClientError::Http {
        status: response.status,
        body: response.body_text(),
    }
}

fn renewal_error(e: RenewalError) -> ClientError {
    if e.is_terminal() {
        ClientError::SessionExpired(e.to_string())
    } else {
        ClientError::Network(e.to_string())
    }
}
