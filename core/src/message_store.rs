/// Ordered, deduplicated message list for one conversation.
///
/// Confirmed entries are unique by server id. A pending entry is replaced at
/// its own index when the server echo carrying its client temp id arrives.
use crate::chat_types::{DeliveryState, Message};
use std::collections::HashSet;

/// What `reconcile` did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Server id already present; nothing changed
    Duplicate,
    /// A pending entry at `index` was confirmed in place
    Confirmed { index: usize },
    /// Appended as a new confirmed entry at `index`
    Appended { index: usize },
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    seen_ids: HashSet<i64>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the confirmed baseline with the fetched history. Pending
    /// entries the history does not already confirm stay at the tail.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let pending: Vec<Message> = self.messages.drain(..).filter(|m| m.is_pending()).collect();
        self.seen_ids.clear();

        for message in history {
            self.reconcile(message);
        }
        for message in pending {
            let confirmed = message
                .client_temp_id
                .as_deref()
                .is_some_and(|temp| self.has_temp_id(temp));
            if !confirmed {
                self.messages.push(message);
            }
        }
    }

    /// Apply one server-confirmed message.
    pub fn reconcile(&mut self, mut incoming: Message) -> Reconciled {
        if let Some(id) = incoming.id {
            if self.seen_ids.contains(&id) {
                return Reconciled::Duplicate;
            }
        }

        incoming.delivery_state = DeliveryState::Confirmed;
        if let Some(id) = incoming.id {
            self.seen_ids.insert(id);
        }

        let pending_index = incoming.client_temp_id.as_deref().and_then(|temp| {
            self.messages
                .iter()
                .position(|m| m.is_pending() && m.client_temp_id.as_deref() == Some(temp))
        });

        match pending_index {
            Some(index) => {
                self.messages[index] = incoming;
                Reconciled::Confirmed { index }
            }
            None => {
                self.messages.push(incoming);
                Reconciled::Appended {
                    index: self.messages.len() - 1,
                }
            }
        }
    }

    /// Append an optimistic entry; returns its index
    pub fn push_pending(&mut self, message: Message) -> usize {
        self.messages.push(Message {
            delivery_state: DeliveryState::Pending,
            ..message
        });
        self.messages.len() - 1
    }

    /// Roll back an optimistic entry that was never transmitted
    pub fn remove_pending(&mut self, client_temp_id: &str) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.is_pending() && m.client_temp_id.as_deref() == Some(client_temp_id)));
        self.messages.len() != before
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    fn has_temp_id(&self, client_temp_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.client_temp_id.as_deref() == Some(client_temp_id))
    }
}
