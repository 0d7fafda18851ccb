//! In-memory backend for engine tests.
//!
//! [`FakeBackend`] holds the shared server-side state; each
//! [`FakeSession`] acts as one signed-in user and implements both ports.
//! Latency is per thread (tokio time, so paused-clock tests stay fast),
//! operations can be made to fail by name or to answer from a snapshot
//! taken before a stall, and every call is counted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

pub use dealroom_media::fixtures::sample_pdf;
use dealroom_net::{ObjectStore, Transport, TransportResult};
use dealroom_shared::{
    ContractDocument, ContractSignature, CreateSaleRequest, CreateThreadRequest, DocumentId,
    LocalFile, MessageKind, MessageRecord, Participant, SaleRequest, SaleRequestStatus,
    SendMessageRequest, SignatureSubmission, SlotKind, ThreadDetail, ThreadId, TransportError,
    UploadedFile, UserId,
};

use crate::state::lock;

#[derive(Default)]
struct FakeState {
    threads: HashMap<ThreadId, ThreadDetail>,
    aliases: HashMap<ThreadId, ThreadId>,
    messages: HashMap<ThreadId, Vec<MessageRecord>>,
    documents: Vec<ContractDocument>,
    objects: HashMap<String, Bytes>,
    sale_requests: Vec<SaleRequest>,
    latency: HashMap<ThreadId, Duration>,
    op_latency: HashMap<&'static str, Duration>,
    stalls: HashMap<&'static str, Duration>,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session(self: &Arc<Self>, user: &str) -> Arc<FakeSession> {
        Arc::new(FakeSession {
            backend: self.clone(),
            user: user.into(),
        })
    }

    pub fn add_thread(&self, id: &str, participants: &[&str]) {
        let detail = ThreadDetail {
            id: id.into(),
            created_by: participants.first().copied().unwrap_or("u1").into(),
            related_post_id: None,
            created_at: Utc::now(),
            participants: participants
                .iter()
                .map(|p| Participant {
                    id: (*p).into(),
                    display_name: p.to_uppercase(),
                    icon_url: None,
                })
                .collect(),
        };
        lock(&self.state).threads.insert(id.into(), detail);
    }

    /// Make `get_thread(from)` answer with thread `to`.
    pub fn alias(&self, from: &str, to: &str) {
        lock(&self.state).aliases.insert(from.into(), to.into());
    }

    pub fn add_message(&self, thread: &str, id: &str, text: &str, image_url: Option<&str>) {
        let record = MessageRecord {
            id: id.into(),
            thread_id: thread.into(),
            sender_user_id: "u2".into(),
            kind: if image_url.is_some() { MessageKind::Image } else { MessageKind::Text },
            text: Some(text.into()),
            image_url: image_url.map(String::from),
            sender_name: None,
            created_at: Utc::now(),
        };
        lock(&self.state)
            .messages
            .entry(thread.into())
            .or_default()
            .push(record);
    }

    pub fn add_sale_request(&self, thread: &str, user: &str, status: SaleRequestStatus) {
        let mut state = lock(&self.state);
        let id = state.next_id("sale");
        state.sale_requests.push(SaleRequest {
            id,
            thread_id: thread.into(),
            user_id: user.into(),
            post_id: "p1".into(),
            price: 1000,
            phone_number: None,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }

    /// Delay every response concerning `thread`.
    pub fn set_latency(&self, thread: &str, latency: Duration) {
        lock(&self.state).latency.insert(thread.into(), latency);
    }

    /// Delay every call to `op`.
    pub fn set_op_latency(&self, op: &'static str, latency: Duration) {
        lock(&self.state).op_latency.insert(op, latency);
    }

    /// The next call to `op` reads its answer, then waits `delay` before
    /// returning it. Models a response computed before a concurrent change.
    pub fn stall_next(&self, op: &'static str, delay: Duration) {
        lock(&self.state).stalls.insert(op, delay);
    }

    pub fn fail_on(&self, op: &'static str) {
        lock(&self.state).failing.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        lock(&self.state).failing.remove(op);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        lock(&self.state).calls.get(op).copied().unwrap_or(0)
    }

    pub fn document(&self, id: &DocumentId) -> Option<ContractDocument> {
        lock(&self.state).documents.iter().find(|d| &d.id == id).cloned()
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        lock(&self.state).objects.get(path).cloned()
    }

    pub fn thread_count(&self) -> usize {
        lock(&self.state).threads.len()
    }

    /// Count the call, then apply failure injection and latency.
    async fn enter(&self, op: &'static str, thread: Option<&ThreadId>) -> TransportResult<()> {
        let delay = {
            let mut state = lock(&self.state);
            *state.calls.entry(op).or_default() += 1;
            let by_thread = thread.and_then(|t| state.latency.get(t)).copied();
            let by_op = state.op_latency.get(op).copied();
            by_thread.into_iter().chain(by_op).max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.state).failing.contains(op) {
            return Err(TransportError::Network(format!("{op} failed")));
        }
        Ok(())
    }

    async fn stall(&self, op: &'static str) {
        let delay = lock(&self.state).stalls.remove(op);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn store_document(
        &self,
        thread_id: &ThreadId,
        kind: SlotKind,
        existing: Option<&DocumentId>,
        file: &LocalFile,
        signer: Option<ContractSignature>,
    ) -> TransportResult<ContractDocument> {
        let mut state = lock(&self.state);
        let version = state.next_id("v");
        let path = format!("contract-documents/{thread_id}/{kind}-{version}.pdf");
        state.objects.insert(path.clone(), file.bytes.clone());

        if let Some(id) = existing {
            let doc = state
                .documents
                .iter_mut()
                .find(|d| &d.id == id)
                .ok_or_else(|| TransportError::NotFound(format!("document {id}")))?;
            doc.file_path = path;
            doc.file_size = Some(file.size());
            doc.updated_at = Utc::now();
            if let Some(signature) = signer {
                doc.add_signature(signature);
            }
            return Ok(doc.clone());
        }

        let id = state.next_id("doc");
        let doc = ContractDocument {
            id: id.into(),
            thread_id: thread_id.clone(),
            uploaded_by: "u1".into(),
            contract_type: kind,
            file_path: path,
            file_name: file.file_name.clone(),
            file_size: Some(file.size()),
            content_type: file.content_type.clone(),
            signed_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            signatures: Vec::new(),
        };
        state.documents.push(doc.clone());
        Ok(doc)
    }

    fn thread_of(&self, id: &DocumentId) -> Option<ThreadId> {
        lock(&self.state)
            .documents
            .iter()
            .find(|d| &d.id == id)
            .map(|d| d.thread_id.clone())
    }
}

pub struct FakeSession {
    backend: Arc<FakeBackend>,
    user: UserId,
}

impl FakeSession {
    fn signature(&self, data: Option<String>) -> ContractSignature {
        ContractSignature {
            user_id: self.user.clone(),
            signed_at: Utc::now(),
            signature_data: data,
        }
    }
}

#[async_trait]
impl Transport for FakeSession {
    async fn get_thread(&self, thread_id: &ThreadId) -> TransportResult<ThreadDetail> {
        self.backend.enter("get_thread", Some(thread_id)).await?;
        let state = lock(&self.backend.state);
        let resolved = state.aliases.get(thread_id).unwrap_or(thread_id);
        state
            .threads
            .get(resolved)
            .cloned()
            .ok_or_else(|| TransportError::NotFound("Thread not found".into()))
    }

    async fn create_thread(&self, request: &CreateThreadRequest) -> TransportResult<ThreadDetail> {
        self.backend.enter("create_thread", None).await?;
        let id = lock(&self.backend.state).next_id("thread");
        let participants: Vec<&str> = request.participant_ids.iter().map(UserId::as_str).collect();
        self.backend.add_thread(&id, &participants);
        let state = lock(&self.backend.state);
        state
            .threads
            .get(&ThreadId::from(id.as_str()))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(id))
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> TransportResult<Vec<MessageRecord>> {
        self.backend.enter("list_messages", Some(thread_id)).await?;
        let messages = {
            let state = lock(&self.backend.state);
            if !state.threads.contains_key(thread_id) && !state.aliases.contains_key(thread_id) {
                return Err(TransportError::NotFound("Thread not found".into()));
            }
            state.messages.get(thread_id).cloned().unwrap_or_default()
        };
        self.backend.stall("list_messages").await;
        Ok(messages)
    }

    async fn send_message(&self, request: &SendMessageRequest) -> TransportResult<MessageRecord> {
        self.backend.enter("send_message", Some(&request.thread_id)).await?;
        let mut state = lock(&self.backend.state);
        let id = state.next_id("msg");
        let record = MessageRecord {
            id: id.into(),
            thread_id: request.thread_id.clone(),
            sender_user_id: self.user.clone(),
            kind: request.kind,
            text: request.text.clone(),
            image_url: request.file_url.clone(),
            sender_name: None,
            created_at: Utc::now(),
        };
        state
            .messages
            .entry(request.thread_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn upload_message_image(&self, file: &LocalFile) -> TransportResult<UploadedFile> {
        self.backend.enter("upload_message_image", None).await?;
        let mut state = lock(&self.backend.state);
        let path = format!("message-images/{}/{}-{}", self.user, state.next_id("img"), file.file_name);
        state.objects.insert(path.clone(), file.bytes.clone());
        Ok(UploadedFile { file_path: path })
    }

    async fn list_contract_documents(
        &self,
        thread_id: &ThreadId,
    ) -> TransportResult<Vec<ContractDocument>> {
        self.backend.enter("list_contract_documents", Some(thread_id)).await?;
        let documents: Vec<ContractDocument> = lock(&self.backend.state)
            .documents
            .iter()
            .filter(|d| &d.thread_id == thread_id)
            .cloned()
            .collect();
        self.backend.stall("list_contract_documents").await;
        Ok(documents)
    }

    async fn upload_contract_document(
        &self,
        thread_id: &ThreadId,
        kind: SlotKind,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        self.backend.enter("upload_contract_document", Some(thread_id)).await?;
        self.backend.store_document(thread_id, kind, None, file, None)
    }

    async fn replace_contract_document(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        let thread = self.backend.thread_of(document_id);
        self.backend.enter("replace_contract_document", thread.as_ref()).await?;
        let doc = self
            .backend
            .document(document_id)
            .ok_or_else(|| TransportError::NotFound(format!("document {document_id}")))?;
        self.backend
            .store_document(&doc.thread_id, doc.contract_type, Some(document_id), file, None)
    }

    async fn save_signed_contract(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        let thread = self.backend.thread_of(document_id);
        self.backend.enter("save_signed_contract", thread.as_ref()).await?;
        let doc = self
            .backend
            .document(document_id)
            .ok_or_else(|| TransportError::NotFound(format!("document {document_id}")))?;
        self.backend.store_document(
            &doc.thread_id,
            doc.contract_type,
            Some(document_id),
            file,
            Some(self.signature(None)),
        )
    }

    async fn add_contract_signature(
        &self,
        document_id: &DocumentId,
        submission: &SignatureSubmission,
    ) -> TransportResult<ContractDocument> {
        let thread = self.backend.thread_of(document_id);
        self.backend.enter("add_contract_signature", thread.as_ref()).await?;
        let signature = self.signature(Some(submission.signature_data.clone()));
        let mut state = lock(&self.backend.state);
        let doc = state
            .documents
            .iter_mut()
            .find(|d| &d.id == document_id)
            .ok_or_else(|| TransportError::NotFound(format!("document {document_id}")))?;
        doc.add_signature(signature);
        Ok(doc.clone())
    }

    async fn list_sale_requests(&self, thread_id: &ThreadId) -> TransportResult<Vec<SaleRequest>> {
        self.backend.enter("list_sale_requests", Some(thread_id)).await?;
        let requests: Vec<SaleRequest> = lock(&self.backend.state)
            .sale_requests
            .iter()
            .filter(|r| &r.thread_id == thread_id)
            .cloned()
            .collect();
        self.backend.stall("list_sale_requests").await;
        Ok(requests)
    }

    async fn create_sale_request(&self, request: &CreateSaleRequest) -> TransportResult<SaleRequest> {
        self.backend.enter("create_sale_request", Some(&request.thread_id)).await?;
        let mut state = lock(&self.backend.state);
        let id = state.next_id("sale");
        let sale = SaleRequest {
            id,
            thread_id: request.thread_id.clone(),
            user_id: self.user.clone(),
            post_id: request.post_id.clone(),
            price: request.price,
            phone_number: request.phone_number.clone(),
            status: SaleRequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.sale_requests.push(sale.clone());
        Ok(sale)
    }
}

#[async_trait]
impl ObjectStore for FakeSession {
    async fn signed_urls(&self, paths: &[String]) -> HashMap<String, String> {
        if self.backend.enter("signed_urls", None).await.is_err() {
            return HashMap::new();
        }
        paths
            .iter()
            .map(|p| (p.clone(), format!("fake://{p}")))
            .collect()
    }

    async fn fetch(&self, url: &str) -> TransportResult<Bytes> {
        self.backend.enter("fetch", None).await?;
        let path = url.strip_prefix("fake://").unwrap_or(url);
        self.backend
            .object(path)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }
}
