//! Thread list summaries, kept current from room events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dealroom_shared::{MessageRecord, ThreadId};

use crate::events::RoomEvent;
use crate::state::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub last_message: Option<MessageRecord>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ThreadIndex {
    summaries: Mutex<HashMap<ThreadId, ThreadSummary>>,
}

impl ThreadIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track a thread with no known last message.
    pub fn insert(&self, thread_id: ThreadId, updated_at: DateTime<Utc>) {
        lock(&self.summaries)
            .entry(thread_id.clone())
            .or_insert(ThreadSummary {
                thread_id,
                last_message: None,
                updated_at,
            });
    }

    pub fn get(&self, thread_id: &ThreadId) -> Option<ThreadSummary> {
        lock(&self.summaries).get(thread_id).cloned()
    }

    /// Most recently active first.
    pub fn summaries(&self) -> Vec<ThreadSummary> {
        let mut summaries: Vec<_> = lock(&self.summaries).values().cloned().collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Fold one event in. Returns whether anything changed.
    pub fn apply(&self, event: &RoomEvent) -> bool {
        let mut summaries = lock(&self.summaries);
        match event {
            RoomEvent::LastMessageChanged { thread_id, message } => {
                let summary = summaries
                    .entry(thread_id.clone())
                    .or_insert_with(|| ThreadSummary {
                        thread_id: thread_id.clone(),
                        last_message: None,
                        updated_at: message.created_at,
                    });
                let newer = summary
                    .last_message
                    .as_ref()
                    .map_or(true, |m| m.created_at <= message.created_at);
                if newer {
                    summary.last_message = Some(message.clone());
                    summary.updated_at = summary.updated_at.max(message.created_at);
                }
                newer
            }
            RoomEvent::NavigateAway { thread_id } => summaries.remove(thread_id).is_some(),
            RoomEvent::ThreadRedirected { .. } => false,
        }
    }

    /// Apply events from `rx` until the bus closes.
    pub fn listen(self: &Arc<Self>, mut rx: broadcast::Receiver<RoomEvent>) -> JoinHandle<()> {
        let index = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if index.apply(&event) {
                            debug!(event = ?event, "Thread index updated");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Thread index fell behind room events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
