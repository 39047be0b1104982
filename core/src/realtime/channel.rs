/// Realtime conversation channel.
///
/// Loads the history over REST, then opens the push connection, reconciles
/// every inbound frame into the message store, and degrades to the REST
/// message endpoint whenever the push connection is not open. There is no
/// automatic reconnect.
///
/// The access credential is only presented at handshake time. If it is
/// renewed while the socket stays open, the socket keeps running on the
/// credential it was opened with.
use crate::api::pipeline::ApiClient;
use crate::chat_types::{ChannelState, ConversationEvent, InboundFrame, Message, OutboundFrame};
use crate::error::{ClientError, Result};
use crate::message_store::{MessageStore, Reconciled};
use crate::realtime::connector::{PushConnector, PushEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONVERSATION_EVENT_CAPACITY: usize = 64;

/// How an outbound message left this client
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Sent over the push channel; shown as pending until the server echoes it
    Pending { client_temp_id: String },
    /// Sent over REST; the confirmed message is already in the store
    Delivered(Message),
}

/// State shared with the inbound pump task
#[derive(Clone)]
struct Shared {
    conversation_id: u64,
    store: Arc<RwLock<MessageStore>>,
    state: Arc<RwLock<ChannelState>>,
    events: broadcast::Sender<ConversationEvent>,
}

impl Shared {
    async fn set_state(&self, next: ChannelState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(
                "Conversation {} channel {:?} -> {:?}",
                self.conversation_id, *state, next
            );
            *state = next;
            let _ = self
                .events
                .send(ConversationEvent::ChannelStateChanged { state: next });
        }
    }

    fn messages_changed(&self) {
        let _ = self.events.send(ConversationEvent::MessagesChanged);
    }
}

/// One conversation view's channel and message list
pub struct ConversationChannel {
    shared: Shared,
    local_display_name: String,
    api: ApiClient,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationChannel {
    /// Load the full history, then open the push connection.
    ///
    /// A history failure is returned to the caller and no connection is
    /// attempted. A handshake failure is logged and leaves the channel
    /// `Closed`, so sends use the REST fallback.
    pub async fn open(
        api: ApiClient,
        connector: Arc<dyn PushConnector>,
        conversation_id: u64,
        local_display_name: impl Into<String>,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(CONVERSATION_EVENT_CAPACITY);
        let channel = Self {
            shared: Shared {
                conversation_id,
                store: Arc::new(RwLock::new(MessageStore::new())),
                state: Arc::new(RwLock::new(ChannelState::Connecting)),
                events,
            },
            local_display_name: local_display_name.into(),
            api,
            outbound: Mutex::new(None),
            pump: Mutex::new(None),
        };

        let history = match channel.api.get_messages(conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                channel.shared.set_state(ChannelState::Closed).await;
                return Err(e);
            }
        };
        info!(
            "Loaded {} messages for conversation {}",
            history.len(),
            conversation_id
        );
        channel.shared.store.write().await.load_history(history);
        channel.shared.messages_changed();

        channel.connect(connector.as_ref()).await;
        Ok(channel)
    }

    async fn connect(&self, connector: &dyn PushConnector) {
        let conversation_id = self.shared.conversation_id;
        let Some(access) = self.api.access_token() else {
            warn!(
                "No access credential, conversation {} stays on REST",
                conversation_id
            );
            self.shared.set_state(ChannelState::Closed).await;
            return;
        };

        let url = self.api.config().chat_url(conversation_id, &access);
        match connector.connect(&url).await {
            Ok(link) => {
                *self.outbound.lock().await = Some(link.outbound);
                self.shared.set_state(ChannelState::Open).await;
                let shared = self.shared.clone();
                let handle = tokio::spawn(pump(shared, link.inbound));
                *self.pump.lock().await = Some(handle);
                info!("Chat channel open for conversation {}", conversation_id);
            }
            Err(e) => {
                warn!(
                    "Chat channel for conversation {} unavailable: {}",
                    conversation_id, e
                );
                self.shared.set_state(ChannelState::Closed).await;
            }
        }
    }

    /// Send a message. Uses the push channel with an optimistic pending entry
    /// when it is open; otherwise posts over REST and appends the result.
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        if text.trim().is_empty() {
            return Err(ClientError::InvalidInput("message is empty".to_string()));
        }

        let client_temp_id = Uuid::new_v4().to_string();
        if self.state().await == ChannelState::Open {
            let frame = serde_json::to_string(&OutboundFrame {
                message: text.to_string(),
                client_temp_id: client_temp_id.clone(),
            })?;

            self.shared.store.write().await.push_pending(Message::pending(
                client_temp_id.clone(),
                text.to_string(),
                self.local_display_name.clone(),
            ));
            self.shared.messages_changed();

            let sender = self.outbound.lock().await.clone();
            if let Some(sender) = sender {
                if sender.send(frame).await.is_ok() {
                    return Ok(SendOutcome::Pending { client_temp_id });
                }
            }

            warn!(
                "Chat channel for conversation {} dropped before send, using REST",
                self.shared.conversation_id
            );
            self.shared.store.write().await.remove_pending(&client_temp_id);
            self.shared.messages_changed();
            self.shared.set_state(ChannelState::Closed).await;
        }

        debug!(
            "Posting message for conversation {} over REST",
            self.shared.conversation_id
        );
        let message = self
            .api
            .post_message(self.shared.conversation_id, text)
            .await?;
        if self.shared.store.write().await.reconcile(message.clone()) != Reconciled::Duplicate {
            self.shared.messages_changed();
        }
        Ok(SendOutcome::Delivered(message))
    }

    /// Tear down on view exit. Only an open connection is closed; nothing is
    /// mutated by the transport afterwards.
    pub async fn close(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        let outbound = self.outbound.lock().await.take();
        if self.state().await == ChannelState::Open {
            // Dropping the last sender makes the writer send a close frame
            drop(outbound);
            info!("Chat channel closed for conversation {}", self.shared.conversation_id);
        }
        self.shared.set_state(ChannelState::Closed).await;
    }

    pub fn conversation_id(&self) -> u64 {
        self.shared.conversation_id
    }

    pub async fn state(&self) -> ChannelState {
        *self.shared.state.read().await
    }

    /// Snapshot of the ordered message list
    pub async fn messages(&self) -> Vec<Message> {
        self.shared.store.read().await.messages().to_vec()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.store.read().await.pending_count()
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for ConversationChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Applies inbound frames until the transport closes or fails
async fn pump(shared: Shared, mut inbound: mpsc::Receiver<PushEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            PushEvent::Frame(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => {
                    let outcome = shared
                        .store
                        .write()
                        .await
                        .reconcile(Message::from(frame.message));
                    match outcome {
                        Reconciled::Duplicate => {
                            debug!("Duplicate frame for conversation {}", shared.conversation_id)
                        }
                        _ => shared.messages_changed(),
                    }
                }
                Err(e) => warn!(
                    "Dropping malformed frame for conversation {}: {}",
                    shared.conversation_id, e
                ),
            },
            PushEvent::Closed => {
                info!("Chat channel for conversation {} closed by server", shared.conversation_id);
                break;
            }
            PushEvent::Error(e) => {
                warn!("Chat channel for conversation {} failed: {}", shared.conversation_id, e);
                break;
            }
        }
    }
    shared.set_state(ChannelState::Closed).await;
}
