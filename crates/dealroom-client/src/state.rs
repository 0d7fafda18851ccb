//! Per-thread view state shared by the synchronizer and the message
//! pipeline.
//!
//! [`ThreadState`] sits behind an `Arc<Mutex<>>`. The lock is only ever held
//! for short synchronous sections, never across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dealroom_shared::{ThreadDetail, ThreadId};

use crate::message::{MessageList, VisibleMessage};
use crate::token::{Epoch, RequestToken};

/// Lock a shared value, recovering the data if a holder panicked.
pub(crate) fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ThreadState {
    /// Current fetch epoch.
    pub epoch: Epoch,

    /// Externally visible thread address. Follows redirections before the
    /// owner has re-selected the resolved thread.
    pub address: Option<ThreadId>,

    /// Thread metadata, once loaded for the current epoch.
    pub detail: Option<ThreadDetail>,

    pub messages: MessageList,

    /// A fetch for the current epoch is outstanding.
    pub loading: bool,

    /// User-facing error for the current thread.
    pub error: Option<String>,

    /// Epoch of the send currently in flight. Cleared on thread change.
    pub sending: Option<RequestToken>,
}

impl ThreadState {
    pub fn new() -> Self {
        Self {
            epoch: Epoch::default(),
            address: None,
            detail: None,
            messages: MessageList::default(),
            loading: false,
            error: None,
            sending: None,
        }
    }

    /// Forget everything belonging to the previous thread.
    pub fn clear_view(&mut self) {
        self.detail = None;
        self.messages.clear();
        self.loading = false;
        self.error = None;
        self.sending = None;
    }

    pub fn snapshot(&self) -> ThreadView {
        ThreadView {
            address: self.address.clone(),
            detail: self.detail.clone(),
            messages: self.messages.to_vec(),
            loading: self.loading,
            error: self.error.clone(),
            is_sending: self.sending.is_some(),
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedThreadState = Arc<Mutex<ThreadState>>;

/// Read-only copy of the view for rendering.
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub address: Option<ThreadId>,
    pub detail: Option<ThreadDetail>,
    pub messages: Vec<VisibleMessage>,
    pub loading: bool,
    pub error: Option<String>,
    pub is_sending: bool,
}
