use thiserror::Error;

use dealroom_media::MediaError;
use dealroom_shared::{DocumentId, ThreadId, TransportError};

/// Local input problems. Never involve a network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Only PDF files can be uploaded: {0}")]
    NotPdf(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Price must be greater than zero")]
    InvalidPrice,

    #[error("Select a listing first")]
    MissingPost,

    #[error("Cannot open a thread with yourself")]
    SelfThread,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Signature error: {0}")]
    Media(#[from] MediaError),

    /// The thread does not exist and could not be recreated.
    #[error("Thread {0} no longer exists")]
    ThreadGone(ThreadId),

    /// The backend kept resolving the thread to another one.
    #[error("Thread {0} keeps redirecting")]
    RedirectLoop(ThreadId),

    #[error("A message is already being sent")]
    SendInFlight,

    #[error("No thread selected")]
    NoThread,

    #[error("No signed-in user")]
    NoIdentity,

    /// A newer thread selection replaced the one this call was working on.
    #[error("Superseded by a newer thread selection")]
    Superseded,

    #[error("Unknown document slot: {0}")]
    UnknownSlot(String),

    #[error("Document {0} is already signed by this user")]
    AlreadySigned(DocumentId),

    #[error("No captured signature to save")]
    NothingCaptured,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
