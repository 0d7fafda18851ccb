//! Optimistic message pipeline.
//!
//! A send appears in the thread immediately as an optimistic entry, then is
//! either reconciled with the server's confirmation or rolled back. Only one
//! send may be in flight per thread.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use dealroom_net::{ObjectStore, Transport};
use dealroom_shared::constants::ATTACHMENT_URL_TIMEOUT;
use dealroom_shared::{
    ClientId, LocalFile, MessageKind, MessageRecord, SendMessageRequest, UserId,
};

use crate::error::{ClientError, Result, ValidationError};
use crate::events::{EventBus, RoomEvent};
use crate::message::{Message, PendingMessage};
use crate::state::{lock, SharedThreadState, ThreadState};
use crate::token::RequestToken;

pub struct MessagePipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    state: SharedThreadState,
    events: EventBus,
    sender: Option<UserId>,
    sender_name: Option<String>,
}

/// Releases the in-flight flag when a send finishes, however it finishes.
/// A flag that already belongs to a newer epoch is left alone.
struct SendGuard<'a> {
    state: &'a Mutex<ThreadState>,
    token: RequestToken,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if state.sending.as_ref() == Some(&self.token) {
            state.sending = None;
        }
    }
}

impl MessagePipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        state: SharedThreadState,
        events: EventBus,
        sender: Option<UserId>,
        sender_name: Option<String>,
    ) -> Self {
        Self {
            transport,
            store,
            state,
            events,
            sender,
            sender_name,
        }
    }

    pub fn is_sending(&self) -> bool {
        lock(&self.state).sending.is_some()
    }

    /// Send `text` and/or `attachment` to the current thread.
    ///
    /// On failure the optimistic entry is removed and the error returned;
    /// restoring the composer input is up to the caller.
    pub async fn send(&self, text: &str, attachment: Option<LocalFile>) -> Result<MessageRecord> {
        let text = (!text.trim().is_empty()).then(|| text.to_string());
        if text.is_none() && attachment.is_none() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let sender = self.sender.clone().ok_or(ClientError::NoIdentity)?;
        let kind = if attachment.is_some() {
            MessageKind::Image
        } else {
            MessageKind::Text
        };
        let client_id = ClientId::new();

        let token = {
            let mut state = lock(&self.state);
            let token = state.epoch.current().cloned().ok_or(ClientError::NoThread)?;
            if state.sending.is_some() {
                debug!(thread = %token.thread_id(), "Send rejected, another is in flight");
                return Err(ClientError::SendInFlight);
            }
            state.sending = Some(token.clone());
            state.messages.push_optimistic(PendingMessage {
                client_id,
                thread_id: token.thread_id().clone(),
                sender_user_id: sender,
                sender_name: self.sender_name.clone(),
                kind,
                text: text.clone(),
                preview: attachment
                    .as_ref()
                    .map(|file| format!("local://{client_id}/{}", file.file_name)),
                created_at: Utc::now(),
            });
            token
        };
        let _guard = SendGuard {
            state: &self.state,
            token: token.clone(),
        };

        let record = match self.deliver(&token, kind, text, attachment).await {
            Ok(record) => record,
            Err(e) => {
                warn!(thread = %token.thread_id(), client_id = %client_id, error = %e, "Send failed");
                let mut state = lock(&self.state);
                if state.epoch.is_current(&token) {
                    state.messages.rollback(client_id);
                }
                return Err(e);
            }
        };

        let mut confirmed = Message::new(record.clone());
        if let Some(path) = record.image_url.as_deref() {
            confirmed.attachment_url = self.attachment_url(path).await;
        }

        {
            let mut state = lock(&self.state);
            if state.epoch.is_current(&token) {
                state.messages.reconcile(client_id, confirmed);
            } else {
                debug!(thread = %token.thread_id(), "Thread changed during send, not reconciling");
            }
        }

        info!(thread = %record.thread_id, message = %record.id, "Message sent");
        self.events.emit(RoomEvent::LastMessageChanged {
            thread_id: record.thread_id.clone(),
            message: record.clone(),
        });
        Ok(record)
    }

    async fn deliver(
        &self,
        token: &RequestToken,
        kind: MessageKind,
        text: Option<String>,
        attachment: Option<LocalFile>,
    ) -> Result<MessageRecord> {
        let file_url = match attachment {
            Some(file) => Some(self.transport.upload_message_image(&file).await?.file_path),
            None => None,
        };

        let request = SendMessageRequest {
            thread_id: token.thread_id().clone(),
            kind,
            text,
            file_url,
        };
        Ok(self.transport.send_message(&request).await?)
    }

    /// A durable URL for a confirmed attachment. Signed only when the
    /// backend returned a storage path rather than a URL.
    async fn attachment_url(&self, path: &str) -> Option<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let paths = [path.to_string()];
        match timeout(ATTACHMENT_URL_TIMEOUT, self.store.signed_urls(&paths)).await {
            Ok(mut urls) => urls.remove(path),
            Err(_) => {
                warn!(path, "Attachment URL resolution timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::message::VisibleMessage;
    use crate::sync::ThreadSynchronizer;
    use crate::testing::FakeBackend;

    struct Harness {
        backend: Arc<FakeBackend>,
        sync: ThreadSynchronizer,
        pipeline: MessagePipeline,
        events: EventBus,
    }

    impl Harness {
        fn new() -> Self {
            let backend = FakeBackend::new();
            backend.add_thread("t1", &["u1", "u2"]);
            backend.add_thread("t2", &["u1", "u3"]);
            let session = backend.session("u1");
            let state = Arc::new(Mutex::new(ThreadState::new()));
            let events = EventBus::new();
            let sync = ThreadSynchronizer::new(
                session.clone(),
                session.clone(),
                state.clone(),
                events.clone(),
                Some("u1".into()),
            );
            let pipeline = MessagePipeline::new(
                session.clone(),
                session,
                state,
                events.clone(),
                Some("u1".into()),
                Some("Alice".into()),
            );
            Self {
                backend,
                sync,
                pipeline,
                events,
            }
        }

        fn messages(&self) -> Vec<VisibleMessage> {
            lock(self.sync.state()).snapshot().messages
        }
    }

    fn png_file() -> LocalFile {
        LocalFile::new("a.png", "image/png", vec![0x89, b'P', b'N', b'G'])
    }

    #[tokio::test]
    async fn test_send_reconciles_optimistic_entry() {
        let h = Harness::new();
        h.backend.add_message("t1", "m1", "hi", None);
        h.sync.select(Some("t1".into()), None).await.unwrap();
        let mut rx = h.events.subscribe();

        let record = h.pipeline.send("hello", None).await.unwrap();

        let messages = h.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.is_optimistic()));
        assert_eq!(messages[1].message_id(), Some(&record.id));
        assert_eq!(messages[1].text(), Some("hello"));
        assert!(!h.pipeline.is_sending());
        assert_eq!(
            rx.try_recv().unwrap(),
            RoomEvent::LastMessageChanged {
                thread_id: "t1".into(),
                message: record
            }
        );
    }

    #[tokio::test]
    async fn test_failed_send_rolls_back() {
        let h = Harness::new();
        h.backend.add_message("t1", "m1", "hi", None);
        h.sync.select(Some("t1".into()), None).await.unwrap();
        h.backend.fail_on("send_message");

        let err = h.pipeline.send("hello", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(h.messages().len(), 1);
        assert!(!h.pipeline.is_sending());

        // The guard is released, so a retry goes through.
        h.backend.recover("send_message");
        h.pipeline.send("hello", None).await.unwrap();
        assert_eq!(h.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_upload_never_submits() {
        let h = Harness::new();
        h.sync.select(Some("t1".into()), None).await.unwrap();
        h.backend.fail_on("upload_message_image");

        assert!(h.pipeline.send("", Some(png_file())).await.is_err());
        assert!(h.messages().is_empty());
        assert_eq!(h.backend.calls("send_message"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_send_rejected_while_pending() {
        let h = Harness::new();
        h.sync.select(Some("t1".into()), None).await.unwrap();
        h.backend.set_op_latency("send_message", Duration::from_millis(100));

        let (first, second) = tokio::join!(h.pipeline.send("first", None), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let result = h.pipeline.send("hello", None).await;
            let visible = h.messages();
            (result, visible)
        });

        first.unwrap();
        let (result, visible) = second;
        assert!(matches!(result, Err(ClientError::SendInFlight)));
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_optimistic());
        assert_eq!(visible[0].text(), Some("first"));

        let messages = h.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(h.backend.calls("send_message"), 1);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let h = Harness::new();
        h.sync.select(Some("t1".into()), None).await.unwrap();

        let err = h.pipeline.send("   ", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::EmptyMessage)));
        assert!(h.messages().is_empty());
        assert_eq!(h.backend.calls("send_message"), 0);
    }

    #[tokio::test]
    async fn test_send_requires_a_thread() {
        let h = Harness::new();
        let err = h.pipeline.send("hello", None).await.unwrap_err();
        assert!(matches!(err, ClientError::NoThread));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_preview_then_signed_url() {
        let h = Harness::new();
        h.sync.select(Some("t1".into()), None).await.unwrap();
        h.backend.set_op_latency("send_message", Duration::from_millis(100));

        let (record, during) = tokio::join!(h.pipeline.send("", Some(png_file())), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            h.messages()
        });

        match during.first() {
            Some(VisibleMessage::Optimistic(p)) => {
                assert!(p.preview.as_deref().is_some_and(|u| u.starts_with("local://")));
                assert_eq!(p.kind, MessageKind::Image);
            }
            other => panic!("expected an optimistic entry, got {other:?}"),
        }

        let record = record.unwrap();
        let path = record.image_url.clone().unwrap();
        assert!(path.starts_with("message-images/u1/"));
        match h.messages().first() {
            Some(VisibleMessage::Confirmed(m)) => {
                assert_eq!(m.attachment_url, Some(format!("fake://{path}")))
            }
            other => panic!("expected a confirmed entry, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_confirmed_during_first_fetch_stays_visible() {
        let h = Harness::new();
        h.backend.stall_next("list_messages", Duration::from_millis(50));

        let (loaded, sent) = tokio::join!(h.sync.select(Some("t1".into()), None), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.pipeline.send("hello", None).await
        });
        loaded.unwrap();
        let record = sent.unwrap();

        let messages = h.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id(), Some(&record.id));
        assert!(!messages[0].is_optimistic());

        // A later fetch lists it once.
        h.sync.reset();
        h.sync.select(Some("t1".into()), None).await.unwrap();
        assert_eq!(h.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_completing_after_thread_switch() {
        let h = Harness::new();
        h.sync.select(Some("t1".into()), None).await.unwrap();
        h.backend.set_op_latency("send_message", Duration::from_millis(100));

        let (sent, switched) = tokio::join!(h.pipeline.send("for t1", None), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            h.sync.select(Some("t2".into()), None).await
        });

        let record = sent.unwrap();
        switched.unwrap();
        assert_eq!(record.thread_id.as_str(), "t1");
        assert!(h.messages().is_empty());

        // The new thread accepts sends straight away.
        h.backend.set_op_latency("send_message", Duration::ZERO);
        h.pipeline.send("for t2", None).await.unwrap();
        assert_eq!(h.messages().len(), 1);
    }
}
