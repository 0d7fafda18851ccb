//! Wire models exchanged with the marketplace backend.
//!
//! Field names follow the backend's snake_case JSON. Every response body is
//! wrapped in an [`ApiEnvelope`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, ThreadId, UserId};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// `{ success, message?, data?, error? }` wrapper around every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// A thread with its participants, as returned by `GET /api/threads/{id}`.
///
/// `id` may differ from the requested id when the backend resolved the
/// request to an equivalent, pre-existing thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadDetail {
    pub id: ThreadId,
    pub created_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_post_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl ThreadDetail {
    pub fn participant_ids(&self) -> Vec<UserId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    /// The participant who is not `me`, if any.
    pub fn counterparty(&self, me: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id != me)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateThreadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_post_id: Option<String>,
    pub participant_ids: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    #[serde(alias = "nda")]
    Contract,
    #[serde(other)]
    Other,
}

/// A message as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_user_id: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Storage path of the attachment, or an already-signed URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub thread_id: ThreadId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// Result of an attachment upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_path: String,
}

// ---------------------------------------------------------------------------
// Contract signatures
// ---------------------------------------------------------------------------

/// A structured signature for an image document (`data:image/png;base64,...`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureSubmission {
    pub signature_data: String,
}

// ---------------------------------------------------------------------------
// Sale requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaleRequestStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// A purchase-intent record attached to a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleRequest {
    pub id: String,
    pub thread_id: ThreadId,
    pub user_id: UserId,
    pub post_id: String,
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub status: SaleRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSaleRequest {
    pub thread_id: ThreadId,
    pub post_id: String,
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedUrlsRequest {
    pub bucket: String,
    pub paths: Vec<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SignedUrls {
    /// Bucket-relative path -> signed URL.
    pub urls: HashMap<String, String>,
}
