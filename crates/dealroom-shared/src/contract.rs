//! Contract documents and their co-signing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::REQUIRED_SIGNERS;
use crate::file::is_pdf;
use crate::types::{DocumentId, ThreadId, UserId};

/// Registry slot a document belongs to. Serialized with the backend's
/// `contract_type` names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Confidentiality agreement.
    Nda,
    /// Letter of intent.
    Loi,
    /// Due-diligence package.
    Dd,
    Transfer,
    Handover,
    Custom,
}

impl SlotKind {
    /// The fixed slots every thread starts with, in display order.
    pub const STANDARD: [SlotKind; 5] = [
        SlotKind::Nda,
        SlotKind::Loi,
        SlotKind::Dd,
        SlotKind::Transfer,
        SlotKind::Handover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Nda => "nda",
            SlotKind::Loi => "loi",
            SlotKind::Dd => "dd",
            SlotKind::Transfer => "transfer",
            SlotKind::Handover => "handover",
            SlotKind::Custom => "custom",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlotKind::Nda => "Confidentiality agreement",
            SlotKind::Loi => "Letter of intent",
            SlotKind::Dd => "Due-diligence package",
            SlotKind::Transfer => "Transfer agreement",
            SlotKind::Handover => "Handover agreement",
            SlotKind::Custom => "Custom document",
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, SlotKind::Custom)
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nda" => Ok(SlotKind::Nda),
            "loi" => Ok(SlotKind::Loi),
            "dd" => Ok(SlotKind::Dd),
            "transfer" => Ok(SlotKind::Transfer),
            "handover" => Ok(SlotKind::Handover),
            "custom" => Ok(SlotKind::Custom),
            other => Err(format!("unknown contract type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractSignature {
    pub user_id: UserId,
    pub signed_at: DateTime<Utc>,
    /// Raw signature image as a data URL (image documents only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_data: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignatureStatus {
    Unsigned,
    PartiallySigned,
    FullySigned,
}

/// A negotiation document. The id survives every signed replacement; only
/// `file_path` and the signature list change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractDocument {
    pub id: DocumentId,
    pub thread_id: ThreadId,
    pub uploaded_by: UserId,
    pub contract_type: SlotKind,
    pub file_path: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub signatures: Vec<ContractSignature>,
}

impl ContractDocument {
    pub fn is_pdf(&self) -> bool {
        is_pdf(&self.content_type, &self.file_name)
    }

    pub fn has_signed(&self, user_id: &UserId) -> bool {
        self.signatures.iter().any(|s| &s.user_id == user_id)
    }

    /// Record a signature. Returns `false` (and changes nothing) if this
    /// user already signed.
    pub fn add_signature(&mut self, signature: ContractSignature) -> bool {
        if self.has_signed(&signature.user_id) {
            return false;
        }
        self.signatures.push(signature);
        true
    }

    /// Signing progress relative to the thread's participants. Signatures
    /// from non-participants are ignored when the participant list is known.
    pub fn status(&self, participants: &[UserId]) -> SignatureStatus {
        let count = if participants.is_empty() {
            self.signatures.len()
        } else {
            participants.iter().filter(|p| self.has_signed(p)).count()
        };

        match count {
            0 => SignatureStatus::Unsigned,
            n if n >= REQUIRED_SIGNERS => SignatureStatus::FullySigned,
            _ => SignatureStatus::PartiallySigned,
        }
    }
}
