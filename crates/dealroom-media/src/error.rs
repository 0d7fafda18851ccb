use thiserror::Error;

use crate::capture::CaptureState;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document has no pages")]
    NoPages,

    #[error("Page {0} has no usable MediaBox")]
    MissingMediaBox(u32),

    #[error("Document has {0} pages: choose the last page or all pages")]
    PlacementRequired(usize),

    #[error("Signature is empty")]
    EmptySignature,

    #[error("Cannot {action} while capture is {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: CaptureState,
    },
}

pub type Result<T> = std::result::Result<T, MediaError>;
