use thiserror::Error;

/// Failures reported by the transport and object-store ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: session could not be refreshed")]
    Unauthorized,

    #[error("Server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Request timed out")]
    Timeout,
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
