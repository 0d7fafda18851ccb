//! Co-signing a contract document.
//!
//! A [`SigningSession`] wraps one document view: the user draws through
//! [`SignatureCapture`], then [`SigningSession::save`] commits. PDFs get the
//! signature embedded and are uploaded as a replacement of the same document;
//! image documents get a structured signature record drawn as an overlay.
//! Nothing is persisted unless every step succeeds.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use dealroom_media::{
    embed_signature, overlay_layout, page_count, resolve_placement, CaptureState, OverlayBox,
    PagePlacement, SignatureCapture,
};
use dealroom_net::{ObjectStore, Transport};
use dealroom_shared::constants::REGISTRY_SETTLE_DELAY;
use dealroom_shared::{
    ContractDocument, LocalFile, SignatureStatus, SignatureSubmission, TransportError, UserId,
};

use crate::error::{ClientError, Result};
use crate::registry::DocumentRegistry;

pub struct SigningSession {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<DocumentRegistry>,
    me: UserId,
    document: ContractDocument,
    capture: SignatureCapture,
}

impl SigningSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        registry: Arc<DocumentRegistry>,
        me: UserId,
        document: ContractDocument,
    ) -> Self {
        Self {
            transport,
            store,
            registry,
            me,
            document,
            capture: SignatureCapture::new(),
        }
    }

    pub fn document(&self) -> &ContractDocument {
        &self.document
    }

    pub fn capture(&self) -> &SignatureCapture {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut SignatureCapture {
        &mut self.capture
    }

    pub fn status(&self, participants: &[UserId]) -> SignatureStatus {
        self.document.status(participants)
    }

    /// Whether the current user may still add a signature.
    pub fn can_sign(&self) -> bool {
        !self.document.has_signed(&self.me)
    }

    /// Overlay boxes for an image document: one per stored signature, plus
    /// the pending capture below them.
    pub fn overlays(&self) -> Vec<OverlayBox> {
        let pending = self.capture.state() == CaptureState::Captured;
        overlay_layout(self.document.signatures.len(), pending)
    }

    /// Current bytes of the document.
    pub async fn load(&self) -> Result<Vec<u8>> {
        let path = &self.document.file_path;
        let url = self
            .store
            .signed_urls(std::slice::from_ref(path))
            .await
            .remove(path)
            .ok_or_else(|| TransportError::NotFound(format!("no signed URL for {path}")))?;
        Ok(self.store.fetch(&url).await?.to_vec())
    }

    /// Page count of a PDF document, so the caller knows whether to ask for
    /// a placement.
    pub async fn page_count(&self) -> Result<usize> {
        let pdf = self.load().await?;
        Ok(page_count(&pdf)?)
    }

    /// Commit the captured signature. `placement` is required for
    /// multi-page PDFs and ignored for image documents.
    ///
    /// On failure the capture stays in `Captured` so the user can retry.
    pub async fn save(&mut self, placement: Option<PagePlacement>) -> Result<ContractDocument> {
        let signature = match (self.capture.state(), self.capture.captured()) {
            (CaptureState::Captured, Some(signature)) => signature.clone(),
            _ => return Err(ClientError::NothingCaptured),
        };
        if self.document.has_signed(&self.me) {
            return Err(ClientError::AlreadySigned(self.document.id.clone()));
        }

        let updated = if self.document.is_pdf() {
            let original = self.load().await?;
            let placement = resolve_placement(page_count(&original)?, placement)?;
            let signed = embed_signature(&original, &signature.png, placement)?;
            debug!(
                document = %self.document.id,
                ?placement,
                before = original.len(),
                after = signed.len(),
                "Signature embedded"
            );
            let file = LocalFile::pdf(self.document.file_name.clone(), signed);
            self.transport
                .save_signed_contract(&self.document.id, &file)
                .await?
        } else {
            let submission = SignatureSubmission {
                signature_data: signature.data_url(),
            };
            self.transport
                .add_contract_signature(&self.document.id, &submission)
                .await?
        };

        self.capture.mark_saved()?;
        info!(
            document = %updated.id,
            user = %self.me,
            signatures = updated.signatures.len(),
            "Signature saved"
        );
        self.document = updated;
        self.refresh_registry().await;
        Ok(self.document.clone())
    }

    /// Re-read the registry after the object store has settled, so slot
    /// status reflects the new signature.
    async fn refresh_registry(&mut self) {
        sleep(REGISTRY_SETTLE_DELAY).await;

        let thread_id = self.document.thread_id.clone();
        if self.registry.thread().as_ref() != Some(&thread_id) {
            return;
        }
        if let Err(e) = self.registry.fetch_all(&thread_id).await {
            warn!(thread = %thread_id, error = %e, "Registry refresh after signing failed");
            return;
        }
        if let Some(doc) = self.registry.document(&self.document.id) {
            self.document = doc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dealroom_media::{signed_pages, MediaError};
    use dealroom_shared::{SlotKind, ThreadId};

    use crate::registry::SlotId;
    use crate::testing::{sample_pdf, FakeBackend};

    fn thread() -> ThreadId {
        "t1".into()
    }

    fn participants() -> Vec<UserId> {
        vec!["u1".into(), "u2".into()]
    }

    async fn open_registry(backend: &Arc<FakeBackend>, user: &str) -> Arc<DocumentRegistry> {
        let registry = Arc::new(DocumentRegistry::new(backend.session(user)));
        registry.fetch_all(&thread()).await.unwrap();
        registry
    }

    fn session_for(
        backend: &Arc<FakeBackend>,
        user: &str,
        registry: Arc<DocumentRegistry>,
        document: ContractDocument,
    ) -> SigningSession {
        let session = backend.session(user);
        SigningSession::new(session.clone(), session, registry, user.into(), document)
    }

    fn draw(session: &mut SigningSession) {
        let capture = session.capture_mut();
        capture.begin().unwrap();
        capture.pointer_down(40.0, 120.0);
        capture.pointer_move(200.0, 60.0);
        capture.pointer_move(380.0, 140.0);
        capture.pointer_up();
        capture.complete().unwrap();
    }

    fn stored_pages(backend: &FakeBackend, doc: &ContractDocument) -> Vec<u32> {
        let bytes = backend.object(&doc.file_path).unwrap();
        signed_pages(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_party_signing() {
        let backend = FakeBackend::new();
        backend.add_thread("t1", &["u1", "u2"]);
        let nda = SlotId::Standard(SlotKind::Nda);

        // U1 uploads a two-page NDA.
        let registry_u1 = open_registry(&backend, "u1").await;
        registry_u1
            .upload(&nda, LocalFile::pdf("nda.pdf", sample_pdf(2)))
            .await
            .unwrap();
        let doc = registry_u1.open(&nda).unwrap();
        assert!(doc.signatures.is_empty());
        assert_eq!(doc.status(&participants()), SignatureStatus::Unsigned);

        // U1 signs the last page only.
        let mut signing = session_for(&backend, "u1", registry_u1.clone(), doc.clone());
        draw(&mut signing);
        let after_u1 = signing.save(Some(PagePlacement::LastPage)).await.unwrap();
        assert_eq!(after_u1.id, doc.id);
        assert_eq!(after_u1.signatures.len(), 1);
        assert_eq!(after_u1.status(&participants()), SignatureStatus::PartiallySigned);
        assert_eq!(stored_pages(&backend, &after_u1), vec![2]);
        assert_eq!(signing.capture().state(), CaptureState::Saved);
        assert_eq!(
            registry_u1.open(&nda).map(|d| d.signatures.len()),
            Some(1)
        );

        // U2 signs every page of the same document.
        let registry_u2 = open_registry(&backend, "u2").await;
        let doc = registry_u2.open(&nda).unwrap();
        let mut signing = session_for(&backend, "u2", registry_u2.clone(), doc);
        assert_eq!(signing.page_count().await.unwrap(), 2);
        draw(&mut signing);
        let after_u2 = signing.save(Some(PagePlacement::AllPages)).await.unwrap();
        assert_eq!(after_u2.id, after_u1.id);
        assert_eq!(after_u2.signatures.len(), 2);
        assert_eq!(after_u2.status(&participants()), SignatureStatus::FullySigned);
        assert_eq!(stored_pages(&backend, &after_u2), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_page_requires_placement() {
        let backend = FakeBackend::new();
        let nda = SlotId::Standard(SlotKind::Nda);
        let registry = open_registry(&backend, "u1").await;
        registry
            .upload(&nda, LocalFile::pdf("nda.pdf", sample_pdf(3)))
            .await
            .unwrap();
        let doc = registry.open(&nda).unwrap();

        let mut signing = session_for(&backend, "u1", registry, doc.clone());
        draw(&mut signing);
        let err = signing.save(None).await.unwrap_err();
        assert!(matches!(err, ClientError::Media(MediaError::PlacementRequired(3))));
        assert_eq!(signing.capture().state(), CaptureState::Captured);
        assert_eq!(backend.calls("save_signed_contract"), 0);
        assert_eq!(backend.document(&doc.id).unwrap().file_path, doc.file_path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_page_needs_no_placement() {
        let backend = FakeBackend::new();
        let nda = SlotId::Standard(SlotKind::Nda);
        let registry = open_registry(&backend, "u1").await;
        registry
            .upload(&nda, LocalFile::pdf("nda.pdf", sample_pdf(1)))
            .await
            .unwrap();
        let doc = registry.open(&nda).unwrap();

        let mut signing = session_for(&backend, "u1", registry, doc);
        draw(&mut signing);
        let saved = signing.save(None).await.unwrap();
        assert_eq!(stored_pages(&backend, &saved), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_signature_by_same_user_rejected() {
        let backend = FakeBackend::new();
        let nda = SlotId::Standard(SlotKind::Nda);
        let registry = open_registry(&backend, "u1").await;
        registry
            .upload(&nda, LocalFile::pdf("nda.pdf", sample_pdf(1)))
            .await
            .unwrap();
        let doc = registry.open(&nda).unwrap();

        let mut signing = session_for(&backend, "u1", registry, doc.clone());
        draw(&mut signing);
        signing.save(None).await.unwrap();
        assert!(!signing.can_sign());

        draw(&mut signing);
        let err = signing.save(None).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadySigned(ref id) if *id == doc.id));
        assert_eq!(backend.calls("save_signed_contract"), 1);
        assert_eq!(backend.document(&doc.id).unwrap().signatures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_persists_nothing() {
        let backend = FakeBackend::new();
        let nda = SlotId::Standard(SlotKind::Nda);
        let registry = open_registry(&backend, "u1").await;
        registry
            .upload(&nda, LocalFile::pdf("nda.pdf", sample_pdf(1)))
            .await
            .unwrap();
        let doc = registry.open(&nda).unwrap();
        backend.fail_on("fetch");

        let mut signing = session_for(&backend, "u1", registry, doc.clone());
        draw(&mut signing);
        let err = signing.save(None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(signing.capture().state(), CaptureState::Captured);
        assert!(backend.document(&doc.id).unwrap().signatures.is_empty());

        // Retrying from the same capture works once the store recovers.
        backend.recover("fetch");
        signing.save(None).await.unwrap();
        assert_eq!(backend.document(&doc.id).unwrap().signatures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_document_gets_signature_record() {
        let backend = FakeBackend::new();
        let image = LocalFile::new("scan.png", "image/png", vec![0x89, b'P', b'N', b'G']);
        let doc = backend
            .session("u2")
            .upload_contract_document(&thread(), SlotKind::Dd, &image)
            .await
            .unwrap();
        let registry = open_registry(&backend, "u1").await;

        let mut signing = session_for(&backend, "u1", registry, doc.clone());
        assert!(signing.overlays().is_empty());
        draw(&mut signing);
        assert_eq!(signing.overlays().len(), 1);

        let saved = signing.save(None).await.unwrap();
        assert_eq!(backend.calls("add_contract_signature"), 1);
        assert_eq!(backend.calls("save_signed_contract"), 0);
        assert_eq!(saved.signatures.len(), 1);
        assert!(saved.signatures[0]
            .signature_data
            .as_deref()
            .is_some_and(|d| d.starts_with("data:image/png;base64,")));

        let overlays = signing.overlays();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].top, 20);
    }

    #[tokio::test]
    async fn test_save_without_capture() {
        let backend = FakeBackend::new();
        let registry = Arc::new(DocumentRegistry::new(backend.session("u1")));
        let file = LocalFile::pdf("nda.pdf", sample_pdf(1));
        let doc = backend
            .session("u1")
            .upload_contract_document(&thread(), SlotKind::Nda, &file)
            .await
            .unwrap();

        let mut signing = session_for(&backend, "u1", registry, doc);
        let err = signing.save(None).await.unwrap_err();
        assert!(matches!(err, ClientError::NothingCaptured));
        assert_eq!(backend.calls("fetch"), 0);
    }
}
