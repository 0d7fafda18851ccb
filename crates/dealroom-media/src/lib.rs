// Signature capture and PDF embedding.

pub mod canvas;
pub mod capture;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
pub mod overlay;
pub mod pdf;

pub use canvas::SignatureCanvas;
pub use capture::{CaptureState, CapturedSignature, SignatureCapture};
pub use error::MediaError;
pub use overlay::{overlay_box, overlay_layout, OverlayBox};
pub use pdf::{embed_signature, page_count, resolve_placement, signature_size, signed_pages, PagePlacement};
