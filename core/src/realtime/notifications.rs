/// Per-user notification feed.
///
/// One push connection per logged-in user. Frames tagged `notification` are
/// decoded and broadcast to subscribers; every other frame type is skipped.
/// Like the chat channel there is no reconnect.
use crate::api::pipeline::ApiClient;
use crate::error::{ClientError, Result};
use crate::realtime::connector::{PushConnector, PushEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Notification {
    /// API path of an attached file, when the notification carries one
    pub fn attachment_url(&self) -> Option<&str> {
        self.data.get("file_url").and_then(|url| url.as_str())
    }
}

#[derive(Deserialize)]
struct FeedFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub struct NotificationFeed {
    events: broadcast::Sender<Notification>,
    // Held so the socket stays open; dropping it closes the connection
    outbound: Option<mpsc::Sender<String>>,
    pump: JoinHandle<()>,
}

impl NotificationFeed {
    /// Connect with the current access credential. Requires a logged-in
    /// session; handshake failures are returned to the caller.
    pub async fn open(api: &ApiClient, connector: &dyn PushConnector) -> Result<Self> {
        let access = api
            .access_token()
            .ok_or_else(|| ClientError::Channel("notifications need a logged-in session".to_string()))?;

        let link = connector
            .connect(&api.config().notifications_url(&access))
            .await?;
        info!("Notifications connected");

        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let pump = tokio::spawn(pump(events.clone(), link.inbound));

        Ok(Self {
            events,
            outbound: Some(link.outbound),
            pump,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// False once the server closed the feed or `close` was called
    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && !self.pump.is_finished()
    }

    pub fn close(&mut self) {
        self.pump.abort();
        if self.outbound.take().is_some() {
            info!("Notifications disconnected");
        }
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(events: broadcast::Sender<Notification>, mut inbound: mpsc::Receiver<PushEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            PushEvent::Frame(text) => match decode(&text) {
                Ok(Some(notification)) => {
                    let _ = events.send(notification);
                }
                Ok(None) => {}
                Err(e) => warn!("Invalid notification payload: {}", e),
            },
            PushEvent::Closed => {
                info!("Notifications closed by server");
                break;
            }
            PushEvent::Error(e) => {
                warn!("Notifications failed: {}", e);
                break;
            }
        }
    }
}

fn decode(text: &str) -> serde_json::Result<Option<Notification>> {
    let frame: FeedFrame = serde_json::from_str(text)?;
    if frame.kind != "notification" {
        debug!("Skipping {} frame on notification feed", frame.kind);
        return Ok(None);
    }
    serde_json::from_value(frame.payload).map(Some)
}
