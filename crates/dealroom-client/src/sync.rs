//! Thread synchronizer.
//!
//! Loads a thread's detail and message history exactly once per distinct
//! thread selection. Each selection starts a new epoch; every continuation
//! re-checks its [`RequestToken`] before touching [`ThreadState`], so a slow
//! response for a thread the user already left is dropped on the floor.
//!
//! The backend may answer a thread request with a different, pre-existing
//! thread. That is reported as [`SyncOutcome::Redirected`] plus a
//! [`RoomEvent::ThreadRedirected`]; the caller re-selects the resolved id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use dealroom_net::{ObjectStore, Transport};
use dealroom_shared::constants::{ATTACHMENT_URL_TIMEOUT, NOT_FOUND_REDIRECT_DELAY};
use dealroom_shared::{
    CreateThreadRequest, MessageRecord, ThreadDetail, ThreadId, TransportError, UserId,
};

use crate::error::{ClientError, Result, ValidationError};
use crate::events::{EventBus, RoomEvent};
use crate::state::{lock, SharedThreadState};
use crate::token::RequestToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No thread selected; the view is empty.
    Cleared,
    /// The thread is already the current selection; nothing was fetched.
    AlreadyCurrent(ThreadId),
    /// Detail and messages for this thread are now in view.
    Loaded(ThreadId),
    /// The backend resolved `requested` to `resolved`. Nothing was applied.
    Redirected { requested: ThreadId, resolved: ThreadId },
    /// A newer selection replaced this one while it was in flight.
    Superseded,
}

enum Recreate {
    Continue(RequestToken),
    Superseded,
    Refused(ClientError),
    Failed,
}

pub struct ThreadSynchronizer {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    state: SharedThreadState,
    events: EventBus,
    me: Option<UserId>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadSynchronizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        state: SharedThreadState,
        events: EventBus,
        me: Option<UserId>,
    ) -> Self {
        Self {
            transport,
            store,
            state,
            events,
            me,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &SharedThreadState {
        &self.state
    }

    /// Make the view hold exactly `thread_id`, or nothing.
    ///
    /// `counterparty` is the user a missing thread should be recreated with.
    /// Re-selecting the current thread is a no-op.
    pub async fn select(
        &self,
        thread_id: Option<ThreadId>,
        counterparty: Option<UserId>,
    ) -> Result<SyncOutcome> {
        let Some(thread_id) = thread_id else {
            self.reset();
            return Ok(SyncOutcome::Cleared);
        };

        let token = {
            let mut state = lock(&self.state);
            if state.epoch.current_thread() == Some(&thread_id) {
                debug!(thread = %thread_id, "Thread already selected");
                return Ok(SyncOutcome::AlreadyCurrent(thread_id));
            }
            let token = state.epoch.advance(thread_id.clone());
            state.clear_view();
            state.address = Some(thread_id.clone());
            state.loading = true;
            token
        };
        self.abort_background();

        self.fetch(token, counterparty).await
    }

    async fn fetch(&self, mut token: RequestToken, counterparty: Option<UserId>) -> Result<SyncOutcome> {
        let mut creation_attempted = false;

        loop {
            let thread_id = token.thread_id().clone();
            debug!(thread = %thread_id, seq = token.seq(), "Fetching thread");

            let (detail, messages) = futures::join!(
                self.transport.get_thread(&thread_id),
                self.transport.list_messages(&thread_id)
            );

            let detail = match detail {
                Ok(detail) => detail,
                Err(e) if e.is_not_found() => {
                    if let Some(counterparty) = counterparty.as_ref().filter(|_| !creation_attempted) {
                        creation_attempted = true;
                        match self.recreate(&token, counterparty).await {
                            Recreate::Continue(next) => {
                                token = next;
                                continue;
                            }
                            Recreate::Superseded => return Ok(SyncOutcome::Superseded),
                            Recreate::Refused(err) => {
                                return if self.mark_gone(&token) {
                                    Err(err)
                                } else {
                                    Ok(SyncOutcome::Superseded)
                                };
                            }
                            Recreate::Failed => {}
                        }
                    }
                    return if self.mark_gone(&token) {
                        Err(ClientError::ThreadGone(thread_id))
                    } else {
                        Ok(SyncOutcome::Superseded)
                    };
                }
                Err(e) => return self.fail(&token, e),
            };

            if detail.id != thread_id {
                return Ok(self.redirect(&token, detail.id));
            }

            let records = match messages {
                Ok(records) => records,
                Err(e) => return self.fail(&token, e),
            };

            return Ok(self.apply(&token, detail, records));
        }
    }

    /// Install the fetched thread and kick off attachment URL resolution.
    fn apply(
        &self,
        token: &RequestToken,
        detail: ThreadDetail,
        records: Vec<MessageRecord>,
    ) -> SyncOutcome {
        let paths = {
            let mut state = lock(&self.state);
            if !state.epoch.is_current(token) {
                debug!(thread = %token.thread_id(), "Discarding stale thread fetch");
                return SyncOutcome::Superseded;
            }
            let count = records.len();
            state.detail = Some(detail);
            state.messages.replace_confirmed(records);
            state.loading = false;
            state.error = None;
            info!(thread = %token.thread_id(), messages = count, "Thread loaded");
            state.messages.unresolved_attachments()
        };

        if !paths.is_empty() {
            self.resolve_attachments(token.clone(), paths);
        }
        SyncOutcome::Loaded(token.thread_id().clone())
    }

    /// Resolve attachment URLs off the critical path. Bounded by a timeout;
    /// failure just leaves the URLs unresolved.
    fn resolve_attachments(&self, token: RequestToken, paths: Vec<String>) {
        let store = self.store.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            let urls = match timeout(ATTACHMENT_URL_TIMEOUT, store.signed_urls(&paths)).await {
                Ok(urls) => urls,
                Err(_) => {
                    warn!(thread = %token.thread_id(), paths = paths.len(), "Attachment URL resolution timed out");
                    HashMap::new()
                }
            };

            let mut state = lock(&state);
            if !state.epoch.is_current(&token) {
                debug!(thread = %token.thread_id(), "Discarding stale attachment URLs");
                return;
            }
            let updated = state.messages.apply_attachment_urls(&urls);
            debug!(thread = %token.thread_id(), updated, "Attachment URLs applied");
        });
        self.track(handle);
    }

    fn redirect(&self, token: &RequestToken, resolved: ThreadId) -> SyncOutcome {
        let requested = token.thread_id().clone();
        {
            let mut state = lock(&self.state);
            if !state.epoch.is_current(token) {
                return SyncOutcome::Superseded;
            }
            state.address = Some(resolved.clone());
            state.loading = false;
            state.epoch.reset();
        }

        info!(requested = %requested, resolved = %resolved, "Thread redirected");
        self.events.emit(RoomEvent::ThreadRedirected {
            requested: requested.clone(),
            resolved: resolved.clone(),
        });
        SyncOutcome::Redirected { requested, resolved }
    }

    /// Try to create the missing thread with `counterparty`.
    async fn recreate(&self, token: &RequestToken, counterparty: &UserId) -> Recreate {
        let me = match self.me.as_ref() {
            Some(me) if me == counterparty => {
                warn!(thread = %token.thread_id(), "Refusing to create a thread with oneself");
                return Recreate::Refused(ValidationError::SelfThread.into());
            }
            Some(me) => me.clone(),
            None => return Recreate::Refused(ClientError::NoIdentity),
        };

        info!(thread = %token.thread_id(), counterparty = %counterparty, "Thread missing, creating it");
        let request = CreateThreadRequest {
            related_post_id: None,
            participant_ids: vec![me, counterparty.clone()],
        };

        let created = match self.transport.create_thread(&request).await {
            Ok(created) => created,
            Err(e) => {
                warn!(thread = %token.thread_id(), error = %e, "Thread creation failed");
                return Recreate::Failed;
            }
        };

        let next = {
            let mut state = lock(&self.state);
            if !state.epoch.is_current(token) {
                return Recreate::Superseded;
            }
            state.epoch.reset();
            state.address = Some(created.id.clone());
            state.epoch.advance(created.id.clone())
        };

        if &created.id != token.thread_id() {
            self.events.emit(RoomEvent::ThreadRedirected {
                requested: token.thread_id().clone(),
                resolved: created.id,
            });
        }
        Recreate::Continue(next)
    }

    /// Terminal not-found: surface the error, then leave the view after a
    /// delay unless the user has moved on. Returns `false` if the token is
    /// already stale.
    fn mark_gone(&self, token: &RequestToken) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.epoch.is_current(token) {
                return false;
            }
            state.loading = false;
            state.error = Some("This thread no longer exists".into());
        }
        warn!(thread = %token.thread_id(), "Thread not found");

        let state = self.state.clone();
        let events = self.events.clone();
        let token = token.clone();
        let handle = tokio::spawn(async move {
            sleep(NOT_FOUND_REDIRECT_DELAY).await;
            let still_current = lock(&state).epoch.is_current(&token);
            if still_current {
                events.emit(RoomEvent::NavigateAway {
                    thread_id: token.thread_id().clone(),
                });
            }
        });
        self.track(handle);
        true
    }

    fn fail(&self, token: &RequestToken, error: TransportError) -> Result<SyncOutcome> {
        let mut state = lock(&self.state);
        if !state.epoch.is_current(token) {
            return Ok(SyncOutcome::Superseded);
        }
        warn!(thread = %token.thread_id(), error = %error, "Thread fetch failed");
        state.loading = false;
        state.error = Some(error.to_string());
        Err(error.into())
    }

    /// Invalidate the epoch, clear the view and stop background work.
    pub fn reset(&self) {
        {
            let mut state = lock(&self.state);
            state.epoch.reset();
            state.clear_view();
            state.address = None;
        }
        self.abort_background();
    }

    pub fn shutdown(&self) {
        self.reset();
        debug!("Thread synchronizer shut down");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = lock(&self.background);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    fn abort_background(&self) {
        for handle in lock(&self.background).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ThreadSynchronizer {
    fn drop(&mut self) {
        self.abort_background();
    }
}
