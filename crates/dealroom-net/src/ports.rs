//! Ports the deal-room engine depends on.
//!
//! The synchronizer, message pipeline, registry and signing session only
//! ever talk to the backend through these two traits, so tests can swap in
//! an in-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use dealroom_shared::{
    ContractDocument, CreateSaleRequest, CreateThreadRequest, DocumentId, LocalFile,
    MessageRecord, SaleRequest, SendMessageRequest, SignatureSubmission, SlotKind, ThreadDetail,
    ThreadId, TransportError, UploadedFile,
};

pub type TransportResult<T> = Result<T, TransportError>;

/// JSON API of the marketplace backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Thread detail. The returned `id` may differ from `thread_id` when the
    /// backend resolved it to an existing equivalent thread.
    async fn get_thread(&self, thread_id: &ThreadId) -> TransportResult<ThreadDetail>;

    /// Create-or-find a thread with the given participants.
    async fn create_thread(&self, request: &CreateThreadRequest) -> TransportResult<ThreadDetail>;

    async fn list_messages(&self, thread_id: &ThreadId) -> TransportResult<Vec<MessageRecord>>;

    async fn send_message(&self, request: &SendMessageRequest) -> TransportResult<MessageRecord>;

    /// Upload a message attachment, returning its storage path.
    async fn upload_message_image(&self, file: &LocalFile) -> TransportResult<UploadedFile>;

    async fn list_contract_documents(
        &self,
        thread_id: &ThreadId,
    ) -> TransportResult<Vec<ContractDocument>>;

    /// First upload into a slot. The backend assigns the document id.
    async fn upload_contract_document(
        &self,
        thread_id: &ThreadId,
        kind: SlotKind,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument>;

    /// Replace the stored bytes of an existing document, keeping its id.
    async fn replace_contract_document(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument>;

    /// Replace a document with a signed version and record the caller's
    /// signature in the same request.
    async fn save_signed_contract(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument>;

    /// Record a structured signature on an image document.
    async fn add_contract_signature(
        &self,
        document_id: &DocumentId,
        submission: &SignatureSubmission,
    ) -> TransportResult<ContractDocument>;

    async fn list_sale_requests(&self, thread_id: &ThreadId) -> TransportResult<Vec<SaleRequest>>;

    async fn create_sale_request(&self, request: &CreateSaleRequest) -> TransportResult<SaleRequest>;
}

/// Binary object store behind the backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short-lived URLs for a set of storage paths, keyed by the path as
    /// given. Best effort: paths that could not be signed are absent.
    async fn signed_urls(&self, paths: &[String]) -> HashMap<String, String>;

    /// Download an object through a (signed) URL.
    async fn fetch(&self, url: &str) -> TransportResult<Bytes>;
}
