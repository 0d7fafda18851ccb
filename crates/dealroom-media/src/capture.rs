use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use dealroom_shared::constants::PNG_MIME;

use crate::canvas::SignatureCanvas;
use crate::error::{MediaError, Result};

/// Lifecycle of one signature capture in a document view.
///
/// `Idle -> Drawing -> Captured -> (Idle | Saved)`. Discarding a capture
/// returns to `Idle`; a failed save stays in `Captured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Drawing,
    Captured,
    Saved,
}

/// A completed drawing, serialised as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedSignature {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CapturedSignature {
    /// `data:image/png;base64,...`, the form stored for image documents.
    pub fn data_url(&self) -> String {
        format!("data:{PNG_MIME};base64,{}", STANDARD.encode(&self.png))
    }
}

pub struct SignatureCapture {
    state: CaptureState,
    canvas: SignatureCanvas,
    captured: Option<CapturedSignature>,
}

impl SignatureCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            canvas: SignatureCanvas::new(),
            captured: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn canvas(&self) -> &SignatureCanvas {
        &self.canvas
    }

    pub fn captured(&self) -> Option<&CapturedSignature> {
        self.captured.as_ref()
    }

    /// Open the drawing surface.
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Idle | CaptureState::Saved => {
                self.canvas.clear();
                self.captured = None;
                self.state = CaptureState::Drawing;
                debug!("Signature capture started");
                Ok(())
            }
            state => Err(MediaError::InvalidTransition {
                action: "begin",
                state,
            }),
        }
    }

    // Pointer events outside `Drawing` are ignored.

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        if self.state == CaptureState::Drawing {
            self.canvas.begin_stroke(x, y);
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if self.state == CaptureState::Drawing {
            self.canvas.extend_stroke(x, y);
        }
    }

    pub fn pointer_up(&mut self) {
        if self.state == CaptureState::Drawing {
            self.canvas.end_stroke();
        }
    }

    /// Erase the canvas without leaving `Drawing`.
    pub fn clear(&mut self) -> Result<()> {
        self.expect_state("clear", CaptureState::Drawing)?;
        self.canvas.clear();
        Ok(())
    }

    /// Serialise the drawing and move to `Captured`.
    pub fn complete(&mut self) -> Result<&CapturedSignature> {
        self.expect_state("complete", CaptureState::Drawing)?;
        if self.canvas.is_blank() {
            return Err(MediaError::EmptySignature);
        }

        let (width, height) = self.canvas.dimensions();
        let png = self.canvas.to_png()?;
        debug!(bytes = png.len(), strokes = self.canvas.stroke_count(), "Signature captured");

        self.state = CaptureState::Captured;
        Ok(self.captured.insert(CapturedSignature { png, width, height }))
    }

    /// Throw away the capture and draw again.
    pub fn redraw(&mut self) -> Result<()> {
        self.expect_state("redraw", CaptureState::Captured)?;
        self.canvas.clear();
        self.captured = None;
        self.state = CaptureState::Drawing;
        Ok(())
    }

    pub fn discard(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Drawing | CaptureState::Captured => {
                self.canvas.clear();
                self.captured = None;
                self.state = CaptureState::Idle;
                debug!("Signature capture discarded");
                Ok(())
            }
            state => Err(MediaError::InvalidTransition {
                action: "discard",
                state,
            }),
        }
    }

    /// Record that the captured signature was committed.
    pub fn mark_saved(&mut self) -> Result<()> {
        self.expect_state("save", CaptureState::Captured)?;
        self.state = CaptureState::Saved;
        Ok(())
    }

    fn expect_state(&self, action: &'static str, expected: CaptureState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MediaError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }
}

impl Default for SignatureCapture {
    fn default() -> Self {
        Self::new()
    }
}
