// Types shared by every deal-room crate: identifiers, wire models, constants
// and the transport error taxonomy.

pub mod constants;
pub mod contract;
pub mod error;
pub mod file;
pub mod models;
pub mod types;

pub use contract::{ContractDocument, ContractSignature, SignatureStatus, SlotKind};
pub use error::TransportError;
pub use file::LocalFile;
pub use models::*;
pub use types::{ClientId, DocumentId, MessageId, ThreadId, UserId};
