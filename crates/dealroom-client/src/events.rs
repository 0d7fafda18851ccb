//! Notifications for sibling components (thread list, router).

use tokio::sync::broadcast;

use dealroom_shared::{MessageRecord, ThreadId};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The backend resolved `requested` to an existing thread `resolved`.
    /// Whoever owns the selected thread id should switch to `resolved`.
    ThreadRedirected {
        requested: ThreadId,
        resolved: ThreadId,
    },

    /// A message was confirmed; thread summaries should show it.
    LastMessageChanged {
        thread_id: ThreadId,
        message: MessageRecord,
    },

    /// The thread is gone for good; leave the view.
    NavigateAway { thread_id: ThreadId },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: RoomEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(event = ?e.0, "No subscribers for room event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
