//! Fetch epochs.
//!
//! Every asynchronous operation that touches per-thread view state captures
//! the [`RequestToken`] current when it started, and re-checks it before
//! each mutation. A newer selection (or a reset) makes older tokens stale,
//! which turns their remaining effects into no-ops.

use dealroom_shared::ThreadId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    seq: u64,
    thread_id: ThreadId,
}

impl RequestToken {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Holder of the current token. Lives inside the same lock as the state it
/// guards, so checking and applying happen atomically.
#[derive(Debug, Default)]
pub struct Epoch {
    current: Option<RequestToken>,
    issued: u64,
}

impl Epoch {
    pub fn current(&self) -> Option<&RequestToken> {
        self.current.as_ref()
    }

    pub fn current_thread(&self) -> Option<&ThreadId> {
        self.current.as_ref().map(RequestToken::thread_id)
    }

    /// Start a new epoch for `thread_id`. Every earlier token becomes stale,
    /// including one for the same thread.
    pub fn advance(&mut self, thread_id: ThreadId) -> RequestToken {
        self.issued += 1;
        let token = RequestToken {
            seq: self.issued,
            thread_id,
        };
        self.current = Some(token.clone());
        token
    }

    pub fn is_current(&self, token: &RequestToken) -> bool {
        self.current.as_ref() == Some(token)
    }

    /// Back to "unset": nothing in flight may apply its result.
    pub fn reset(&mut self) {
        self.current = None;
    }
}
