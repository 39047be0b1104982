/// Per-conversation push channels and the per-user notification feed
pub mod channel;
pub mod connector;
pub mod notifications;

pub use channel::{ConversationChannel, SendOutcome};
pub use connector::{PushConnector, PushEvent, PushLink, WebSocketConnector};
pub use notifications::{Notification, NotificationFeed};
