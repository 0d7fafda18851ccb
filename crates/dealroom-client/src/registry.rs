//! Per-thread contract document registry.
//!
//! Five standard slots plus any number of custom ones. Slots are filled from
//! the backend by [`DocumentRegistry::fetch_all`]; uploads mark the slot
//! optimistically and re-read the registry once the backend has assigned an
//! id and path.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use dealroom_net::Transport;
use dealroom_shared::constants::VALIDATION_DISMISS_AFTER;
use dealroom_shared::{ContractDocument, DocumentId, LocalFile, SlotKind, ThreadId};

use crate::error::{ClientError, Result, ValidationError};
use crate::state::lock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotId {
    Standard(SlotKind),
    /// A custom slot: the document id once stored, a local id before that.
    Custom(String),
}

impl SlotId {
    fn kind(&self) -> SlotKind {
        match self {
            SlotId::Standard(kind) => *kind,
            SlotId::Custom(_) => SlotKind::Custom,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Standard(kind) => f.write_str(kind.as_str()),
            SlotId::Custom(id) => write!(f, "custom:{id}"),
        }
    }
}

impl std::str::FromStr for SlotId {
    type Err = String;

    /// `nda`, `loi`, ... for standard slots, `custom:<id>` for custom ones.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("custom:") {
            return Ok(SlotId::Custom(id.to_string()));
        }
        match s.parse::<SlotKind>()? {
            SlotKind::Custom => Err("custom slots are addressed as custom:<id>".to_string()),
            kind => Ok(SlotId::Standard(kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotContent {
    Empty,
    /// An upload in progress. PDFs get no preview.
    Local { file_name: String, size: u64 },
    Stored(ContractDocument),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub label: String,
    pub content: SlotContent,
}

impl Slot {
    fn standard(kind: SlotKind) -> Self {
        Self {
            id: SlotId::Standard(kind),
            label: kind.label().to_string(),
            content: SlotContent::Empty,
        }
    }

    fn stored_custom(doc: ContractDocument) -> Self {
        Self {
            id: SlotId::Custom(doc.id.to_string()),
            label: doc.file_name.clone(),
            content: SlotContent::Stored(doc),
        }
    }

    pub fn document(&self) -> Option<&ContractDocument> {
        match &self.content {
            SlotContent::Stored(doc) => Some(doc),
            _ => None,
        }
    }
}

struct RegistryState {
    thread: Option<ThreadId>,
    standard: Vec<Slot>,
    custom: Vec<Slot>,
    notice: Option<String>,
    notice_generation: u64,
    /// Bumped by every listing request and upload; a listing only applies
    /// if nothing newer started while it was in flight.
    listing: u64,
    next_local_id: u64,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            thread: None,
            standard: SlotKind::STANDARD.iter().copied().map(Slot::standard).collect(),
            custom: Vec::new(),
            notice: None,
            notice_generation: 0,
            listing: 0,
            next_local_id: 0,
        }
    }

    fn slot_mut(&mut self, id: &SlotId) -> Option<&mut Slot> {
        self.standard
            .iter_mut()
            .chain(self.custom.iter_mut())
            .find(|s| &s.id == id)
    }

    fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.standard.iter().chain(self.custom.iter())
    }

    /// Install a fresh server listing. Standard slots take the most recently
    /// updated document of their kind; custom documents replace the custom
    /// list, local-only slots included.
    fn merge(&mut self, documents: Vec<ContractDocument>) {
        for slot in &mut self.standard {
            let kind = slot.id.kind();
            slot.content = documents
                .iter()
                .filter(|d| d.contract_type == kind)
                .max_by_key(|d| d.updated_at)
                .cloned()
                .map_or(SlotContent::Empty, SlotContent::Stored);
        }

        let mut custom: Vec<ContractDocument> = documents
            .into_iter()
            .filter(|d| d.contract_type.is_custom())
            .collect();
        custom.sort_by_key(|d| d.created_at);
        self.custom = custom.into_iter().map(Slot::stored_custom).collect();
    }
}

pub struct DocumentRegistry {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<RegistryState>>,
    notice_task: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(RegistryState::new())),
            notice_task: Mutex::new(None),
        }
    }

    pub fn thread(&self) -> Option<ThreadId> {
        lock(&self.state).thread.clone()
    }

    /// Standard slots in display order, then custom slots.
    pub fn slots(&self) -> Vec<Slot> {
        lock(&self.state).slots().cloned().collect()
    }

    pub fn slot(&self, id: &SlotId) -> Option<Slot> {
        lock(&self.state).slots().find(|s| &s.id == id).cloned()
    }

    pub fn document(&self, id: &DocumentId) -> Option<ContractDocument> {
        lock(&self.state)
            .slots()
            .filter_map(Slot::document)
            .find(|d| &d.id == id)
            .cloned()
    }

    /// The current validation notice, if one is showing.
    pub fn notice(&self) -> Option<String> {
        lock(&self.state).notice.clone()
    }

    /// The slot's document, once it has both a server id and a durable path.
    pub fn open(&self, id: &SlotId) -> Option<ContractDocument> {
        self.slot(id)
            .and_then(|slot| slot.document().cloned())
            .filter(|doc| !doc.id.as_str().is_empty() && !doc.file_path.is_empty())
    }

    /// Load every document of `thread_id`. Switching threads empties the
    /// slots first; a listing for a thread the registry has since left is
    /// dropped.
    pub async fn fetch_all(&self, thread_id: &ThreadId) -> Result<()> {
        let listing = {
            let mut state = lock(&self.state);
            if state.thread.as_ref() != Some(thread_id) {
                let notice = state.notice.take();
                let notice_generation = state.notice_generation;
                let listing = state.listing;
                *state = RegistryState {
                    thread: Some(thread_id.clone()),
                    notice,
                    notice_generation,
                    listing,
                    ..RegistryState::new()
                };
            }
            state.listing += 1;
            state.listing
        };

        let documents = self.transport.list_contract_documents(thread_id).await?;

        let mut state = lock(&self.state);
        if state.thread.as_ref() != Some(thread_id) {
            debug!(thread = %thread_id, "Discarding document listing for a thread no longer shown");
            return Ok(());
        }
        if state.listing != listing {
            debug!(thread = %thread_id, "Discarding superseded document listing");
            return Ok(());
        }
        debug!(thread = %thread_id, documents = documents.len(), "Document registry refreshed");
        state.merge(documents);
        Ok(())
    }

    /// Upload `file` into slot `id`. Non-PDF files are refused locally with
    /// a notice that clears itself. A slot that already holds a document
    /// has it replaced in place.
    pub async fn upload(&self, id: &SlotId, file: LocalFile) -> Result<ContractDocument> {
        if !file.is_pdf() {
            let err = ValidationError::NotPdf(file.file_name.clone());
            self.show_notice(err.to_string());
            return Err(err.into());
        }

        let (thread_id, previous) = {
            let mut state = lock(&self.state);
            let thread_id = state.thread.clone().ok_or(ClientError::NoThread)?;
            let slot = state
                .slot_mut(id)
                .ok_or_else(|| ClientError::UnknownSlot(id.to_string()))?;
            let previous = std::mem::replace(
                &mut slot.content,
                SlotContent::Local {
                    file_name: file.file_name.clone(),
                    size: file.size(),
                },
            );
            state.listing += 1;
            (thread_id, previous)
        };

        info!(
            thread = %thread_id,
            slot = %id,
            file = %file.file_name,
            digest = %file.digest(),
            "Uploading contract document"
        );
        let result = match &previous {
            SlotContent::Stored(doc) => self.transport.replace_contract_document(&doc.id, &file).await,
            _ => {
                self.transport
                    .upload_contract_document(&thread_id, id.kind(), &file)
                    .await
            }
        };

        let doc = match result {
            Ok(doc) => doc,
            Err(e) => {
                warn!(thread = %thread_id, slot = %id, error = %e, "Contract upload failed");
                let mut state = lock(&self.state);
                if state.thread.as_ref() == Some(&thread_id) {
                    if let Some(slot) = state.slot_mut(id) {
                        slot.content = previous;
                    }
                }
                return Err(e.into());
            }
        };

        {
            let mut state = lock(&self.state);
            if state.thread.as_ref() == Some(&thread_id) {
                if let Some(slot) = state.slot_mut(id) {
                    slot.content = SlotContent::Stored(doc.clone());
                }
            }
        }

        if let Err(e) = self.fetch_all(&thread_id).await {
            warn!(thread = %thread_id, error = %e, "Registry refresh after upload failed");
        }
        Ok(doc)
    }

    /// Append an empty custom slot and return its local id.
    pub fn add_custom_slot(&self) -> SlotId {
        let mut state = lock(&self.state);
        state.next_local_id += 1;
        let id = SlotId::Custom(format!("local-{}", state.next_local_id));
        state.custom.push(Slot {
            id: id.clone(),
            label: SlotKind::Custom.label().to_string(),
            content: SlotContent::Empty,
        });
        id
    }

    /// Drop a custom slot from the local list. A stored document is left
    /// on the backend.
    pub fn remove_custom_slot(&self, id: &SlotId) -> bool {
        let mut state = lock(&self.state);
        let before = state.custom.len();
        state.custom.retain(|s| &s.id != id);
        state.custom.len() != before
    }

    pub fn reset(&self) {
        if let Some(handle) = lock(&self.notice_task).take() {
            handle.abort();
        }
        let mut state = lock(&self.state);
        let listing = state.listing + 1;
        *state = RegistryState {
            listing,
            ..RegistryState::new()
        };
    }

    fn show_notice(&self, text: String) {
        let generation = {
            let mut state = lock(&self.state);
            state.notice_generation += 1;
            state.notice = Some(text);
            state.notice_generation
        };

        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            sleep(VALIDATION_DISMISS_AFTER).await;
            let mut state = lock(&state);
            if state.notice_generation == generation {
                state.notice = None;
            }
        });
        if let Some(previous) = lock(&self.notice_task).replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for DocumentRegistry {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.notice_task).take() {
            handle.abort();
        }
    }
}
