//! The deal room: one open thread with its messages, contract registry and
//! sale requests.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use dealroom_net::{HttpTransport, ObjectStore, Transport};
use dealroom_shared::{LocalFile, MessageRecord, ThreadId, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::EventBus;
use crate::pipeline::MessagePipeline;
use crate::poller::SaleRequestPoller;
use crate::registry::{DocumentRegistry, SlotId};
use crate::signing::SigningSession;
use crate::state::{lock, ThreadState, ThreadView};
use crate::sync::{SyncOutcome, ThreadSynchronizer};

/// Redirections followed by a single `open` before giving up.
const MAX_REDIRECTS: usize = 3;

pub struct DealRoom {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    me: Option<UserId>,
    events: EventBus,
    sync: ThreadSynchronizer,
    pipeline: MessagePipeline,
    registry: Arc<DocumentRegistry>,
    poller: SaleRequestPoller,
}

impl DealRoom {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        me: Option<UserId>,
        display_name: Option<String>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ThreadState::new()));
        let events = EventBus::new();

        Self {
            sync: ThreadSynchronizer::new(
                transport.clone(),
                store.clone(),
                state.clone(),
                events.clone(),
                me.clone(),
            ),
            pipeline: MessagePipeline::new(
                transport.clone(),
                store.clone(),
                state,
                events.clone(),
                me.clone(),
                display_name,
            ),
            registry: Arc::new(DocumentRegistry::new(transport.clone())),
            poller: SaleRequestPoller::new(transport.clone()),
            transport,
            store,
            me,
            events,
        }
    }

    /// A room talking to the HTTP backend described by `config`.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let http = HttpTransport::new(
            config.api_url.clone(),
            config.access_token.clone(),
            config.request_timeout,
        )?;
        let store = Arc::new(http.object_store(config.signed_url_expiry_secs));
        info!(api = %config.api_url, user = ?config.user_id, "Deal room connected");
        Ok(Self::new(
            Arc::new(http),
            store,
            config.user_id.clone(),
            config.user_name.clone(),
        ))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn me(&self) -> Option<&UserId> {
        self.me.as_ref()
    }

    pub fn view(&self) -> ThreadView {
        lock(self.sync.state()).snapshot()
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn poller(&self) -> &SaleRequestPoller {
        &self.poller
    }

    /// Participants of the loaded thread.
    pub fn participants(&self) -> Vec<UserId> {
        lock(self.sync.state())
            .detail
            .as_ref()
            .map(|d| d.participant_ids())
            .unwrap_or_default()
    }

    /// Open `thread_id`, following backend redirections, then load its
    /// contract registry and start polling its sale requests. Returns the
    /// id of the thread actually opened.
    pub async fn open(&self, thread_id: ThreadId, counterparty: Option<UserId>) -> Result<ThreadId> {
        let result = self.follow(thread_id, counterparty).await;
        match &result {
            Ok(_) | Err(ClientError::Superseded) => {}
            Err(e) => {
                // The view left the previous thread, so its documents and
                // sale requests go too.
                debug!(error = %e, "Open failed, detaching registry and poller");
                self.registry.reset();
                self.poller.stop();
            }
        }
        result
    }

    async fn follow(&self, thread_id: ThreadId, counterparty: Option<UserId>) -> Result<ThreadId> {
        let mut target = thread_id;

        for _ in 0..=MAX_REDIRECTS {
            let opened = match self.sync.select(Some(target.clone()), counterparty.clone()).await? {
                SyncOutcome::Redirected { resolved, .. } => {
                    target = resolved;
                    continue;
                }
                SyncOutcome::Loaded(id) | SyncOutcome::AlreadyCurrent(id) => id,
                SyncOutcome::Superseded => return Err(ClientError::Superseded),
                SyncOutcome::Cleared => return Err(ClientError::NoThread),
            };

            if let Err(e) = self.registry.fetch_all(&opened).await {
                warn!(thread = %opened, error = %e, "Document registry load failed");
            }
            self.poller.start(opened.clone());
            return Ok(opened);
        }

        warn!(thread = %target, "Too many thread redirections");
        self.sync.reset();
        Err(ClientError::RedirectLoop(target))
    }

    /// Leave the current thread and stop all background work.
    pub fn close(&self) {
        self.sync.shutdown();
        self.registry.reset();
        self.poller.stop();
    }

    pub async fn send(&self, text: &str, attachment: Option<LocalFile>) -> Result<MessageRecord> {
        self.pipeline.send(text, attachment).await
    }

    /// Start signing the document in `slot`. The slot must hold a stored
    /// document.
    pub fn signing_session(&self, slot: &SlotId) -> Result<SigningSession> {
        let me = self.me.clone().ok_or(ClientError::NoIdentity)?;
        let document = self
            .registry
            .open(slot)
            .ok_or_else(|| ClientError::UnknownSlot(slot.to_string()))?;
        Ok(SigningSession::new(
            self.transport.clone(),
            self.store.clone(),
            self.registry.clone(),
            me,
            document,
        ))
    }
}
