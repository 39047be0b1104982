/// Shared types for the conversation layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side delivery status of a message as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Shown optimistically, not yet echoed by the server
    Pending,
    Confirmed,
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier; absent on pending entries
    pub id: Option<i64>,
    /// Identifier chosen by the sending client at creation time
    pub client_temp_id: Option<String>,
    pub content: String,
    pub sender_display_name: String,
    pub created_at: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Local optimistic echo of an outbound message
    pub fn pending(client_temp_id: String, content: String, sender_display_name: String) -> Self {
        Self {
            id: None,
            client_temp_id: Some(client_temp_id),
            content,
            sender_display_name,
            created_at: Utc::now(),
            delivery_state: DeliveryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery_state == DeliveryState::Pending
    }
}

/// Message as the server serializes it, in REST bodies and push frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    pub content: String,
    pub sender_display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: Some(wire.id),
            client_temp_id: wire.client_temp_id,
            content: wire.content,
            sender_display_name: wire.sender_display_name,
            created_at: wire.created_at,
            delivery_state: DeliveryState::Confirmed,
        }
    }
}

/// REST body for the fallback send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
}

/// Push frame received from the chat socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub message: WireMessage,
}

/// Push frame sent over the chat socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
    pub client_temp_id: String,
}

/// Lifecycle of a conversation's push channel. Driven by transport events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Change notifications for whoever renders a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// The message list changed and should be re-read
    MessagesChanged,
    ChannelStateChanged { state: ChannelState },
}
