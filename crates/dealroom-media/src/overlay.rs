//! Signature overlays for image documents.
//!
//! Image documents keep their pixels untouched; each signature is drawn
//! over the preview in a box stacked down the right edge.

use dealroom_shared::constants::{
    OVERLAY_MAX_WIDTH, OVERLAY_RIGHT_OFFSET, OVERLAY_STACK_STEP, OVERLAY_TOP_OFFSET,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayBox {
    pub top: u32,
    pub right: u32,
    pub max_width: u32,
}

/// Box for the signature at `index` in the document's signature list.
pub fn overlay_box(index: usize) -> OverlayBox {
    OverlayBox {
        top: OVERLAY_TOP_OFFSET + index as u32 * OVERLAY_STACK_STEP,
        right: OVERLAY_RIGHT_OFFSET,
        max_width: OVERLAY_MAX_WIDTH,
    }
}

/// Boxes for `saved` stored signatures, plus one for an unsaved capture
/// which always sits below them.
pub fn overlay_layout(saved: usize, pending: bool) -> Vec<OverlayBox> {
    let count = saved + usize::from(pending);
    (0..count).map(overlay_box).collect()
}
