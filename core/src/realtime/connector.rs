/// Push transport: one bidirectional text channel per conversation
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

/// Lifecycle and data events coming off the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// One text frame, not yet parsed
    Frame(String),
    /// The peer closed the connection
    Closed,
    /// Transport-level failure; the connection is gone
    Error(String),
}

/// An open connection. Dropping `outbound` closes the socket.
pub struct PushLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<PushEvent>,
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Perform the handshake against `url`
    async fn connect(&self, url: &str) -> Result<PushLink>;
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<PushLink> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                ClientError::Channel(format!(
                    "handshake timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| ClientError::Channel(format!("handshake failed: {}", e)))?;

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<PushEvent>(INBOUND_CAPACITY);

        // Writer: forwards frames until every sender is dropped, then closes
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    warn!("Chat socket write failed: {}", e);
                    return;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
            debug!("Chat socket writer finished");
        });

        // Reader: surfaces frames and the terminal close/error
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(WsMessage::Text(text)) => PushEvent::Frame(text),
                    Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => PushEvent::Frame(text),
                        Err(_) => {
                            warn!("Ignoring non-UTF-8 binary chat frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(_)) => {
                        let _ = inbound_tx.send(PushEvent::Closed).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(PushEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(PushEvent::Closed).await;
        });

        Ok(PushLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
