//! The visible message list of a thread.
//!
//! An entry is either an optimistic send (keyed by its [`ClientId`]) or a
//! server-confirmed message (keyed by its [`MessageId`]). Reconciliation is
//! a replace-by-client-id, so a logical send is never visible twice.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use dealroom_shared::{ClientId, MessageId, MessageKind, MessageRecord, ThreadId, UserId};

/// A locally fabricated message awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub client_id: ClientId,
    pub thread_id: ThreadId,
    pub sender_user_id: UserId,
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    pub text: Option<String>,
    /// Local-only reference to the attachment being uploaded.
    pub preview: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A confirmed message with its attachment URL, once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub record: MessageRecord,
    pub attachment_url: Option<String>,
}

impl Message {
    pub fn new(record: MessageRecord) -> Self {
        Self {
            record,
            attachment_url: None,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.record.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibleMessage {
    Optimistic(PendingMessage),
    Confirmed(Message),
}

impl VisibleMessage {
    pub fn is_optimistic(&self) -> bool {
        matches!(self, VisibleMessage::Optimistic(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            VisibleMessage::Optimistic(p) => p.text.as_deref(),
            VisibleMessage::Confirmed(m) => m.record.text.as_deref(),
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            VisibleMessage::Optimistic(p) => Some(p.client_id),
            VisibleMessage::Confirmed(_) => None,
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            VisibleMessage::Optimistic(_) => None,
            VisibleMessage::Confirmed(m) => Some(m.id()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageList {
    items: Vec<VisibleMessage>,
    /// Ids confirmed by a local send that no fetched list has shown yet.
    local_confirmed: HashSet<MessageId>,
}

impl MessageList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisibleMessage> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<VisibleMessage> {
        self.items.clone()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.local_confirmed.clear();
    }

    fn contains_id(&self, id: &MessageId) -> bool {
        self.items.iter().any(|m| m.message_id() == Some(id))
    }

    fn position_of(&self, client_id: ClientId) -> Option<usize> {
        self.items
            .iter()
            .position(|m| m.client_id() == Some(client_id))
    }

    pub fn push_optimistic(&mut self, pending: PendingMessage) {
        self.items.push(VisibleMessage::Optimistic(pending));
    }

    /// Replace the optimistic entry `client_id` with its confirmation. If
    /// the confirmed message is already listed (a fetch got there first)
    /// the optimistic entry is just dropped. Returns whether the entry was
    /// found.
    pub fn reconcile(&mut self, client_id: ClientId, confirmed: Message) -> bool {
        let Some(index) = self.position_of(client_id) else {
            return false;
        };

        if self.contains_id(confirmed.id()) {
            self.items.remove(index);
        } else {
            self.local_confirmed.insert(confirmed.id().clone());
            self.items[index] = VisibleMessage::Confirmed(confirmed);
        }
        true
    }

    /// Remove a failed optimistic entry.
    pub fn rollback(&mut self, client_id: ClientId) -> bool {
        match self.position_of(client_id) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Install a freshly fetched list. Optimistic entries still in flight
    /// stay visible after it, and so do local sends the list predates.
    pub fn replace_confirmed(&mut self, records: Vec<MessageRecord>) {
        let mut seen = HashSet::new();
        let fetched: Vec<VisibleMessage> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .map(|r| VisibleMessage::Confirmed(Message::new(r)))
            .collect();

        self.local_confirmed.retain(|id| !seen.contains(id));
        let local_confirmed = &self.local_confirmed;
        let kept: Vec<VisibleMessage> = self
            .items
            .drain(..)
            .filter(|m| match m {
                VisibleMessage::Optimistic(_) => true,
                VisibleMessage::Confirmed(m) => local_confirmed.contains(m.id()),
            })
            .collect();

        self.items = fetched;
        self.items.extend(kept);
    }

    /// Attachment paths of confirmed messages that still need a URL.
    pub fn unresolved_attachments(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .items
            .iter()
            .filter_map(|m| match m {
                VisibleMessage::Confirmed(m) if m.attachment_url.is_none() => {
                    m.record.image_url.clone()
                }
                _ => None,
            })
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Fill in resolved URLs. Only confirmed entries that are still present
    /// and have no URL yet are touched. Returns how many were updated.
    pub fn apply_attachment_urls(&mut self, urls: &HashMap<String, String>) -> usize {
        let mut updated = 0;
        for item in &mut self.items {
            if let VisibleMessage::Confirmed(m) = item {
                if m.attachment_url.is_some() {
                    continue;
                }
                if let Some(url) = m.record.image_url.as_ref().and_then(|p| urls.get(p)) {
                    m.attachment_url = Some(url.clone());
                    updated += 1;
                }
            }
        }
        updated
    }
}
