//! Fixed-size freehand drawing surface.
//!
//! Strokes are rasterised straight into an RGBA buffer with a transparent
//! background. Segments are drawn by stamping discs along the path, which
//! gives round caps and joins for free.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use dealroom_shared::constants::{
    SIGNATURE_CANVAS_HEIGHT, SIGNATURE_CANVAS_WIDTH, SIGNATURE_STROKE_RGB, SIGNATURE_STROKE_WIDTH,
};

use crate::error::Result;

pub struct SignatureCanvas {
    image: RgbaImage,
    last_point: Option<(f32, f32)>,
    stroke_count: usize,
}

impl SignatureCanvas {
    pub fn new() -> Self {
        Self::with_size(SIGNATURE_CANVAS_WIDTH, SIGNATURE_CANVAS_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            last_point: None,
            stroke_count: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn stroke_count(&self) -> usize {
        self.stroke_count
    }

    /// Whether nothing has been drawn since the last clear.
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p.0[3] == 0)
    }

    pub fn begin_stroke(&mut self, x: f32, y: f32) {
        let (x, y) = self.hold(x, y);
        self.stroke_count += 1;
        self.stamp(x, y);
        self.last_point = Some((x, y));
    }

    /// Extend the current stroke. Ignored when no stroke is in progress.
    pub fn extend_stroke(&mut self, x: f32, y: f32) {
        let Some((x0, y0)) = self.last_point else {
            return;
        };
        let (x, y) = self.hold(x, y);

        let distance = ((x - x0).powi(2) + (y - y0).powi(2)).sqrt();
        let steps = (distance / 0.5).ceil().max(1.0) as usize;
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(x0 + (x - x0) * t, y0 + (y - y0) * t);
        }
        self.last_point = Some((x, y));
    }

    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.last_point = None;
        self.stroke_count = 0;
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// Keep a pointer position within one stroke width of the surface.
    /// Off-surface points still draw nothing, and a segment never needs
    /// more steps than the surface diagonal.
    fn hold(&self, x: f32, y: f32) -> (f32, f32) {
        let (width, height) = self.image.dimensions();
        let margin = SIGNATURE_STROKE_WIDTH;
        (
            x.clamp(-margin, width as f32 + margin),
            y.clamp(-margin, height as f32 + margin),
        )
    }

    fn stamp(&mut self, cx: f32, cy: f32) {
        let radius = SIGNATURE_STROKE_WIDTH / 2.0;
        let (width, height) = self.image.dimensions();
        let [r, g, b] = SIGNATURE_STROKE_RGB;

        let min_x = (cx - radius).floor().max(0.0) as u32;
        let min_y = (cy - radius).floor().max(0.0) as u32;
        let max_x = ((cx + radius).ceil() as i64).min(width as i64 - 1);
        let max_y = ((cy + radius).ceil() as i64).min(height as i64 - 1);
        if max_x < 0 || max_y < 0 {
            return;
        }

        for py in min_y..=max_y as u32 {
            for px in min_x..=max_x as u32 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= radius * radius {
                    self.image.put_pixel(px, py, Rgba([r, g, b, 255]));
                }
            }
        }
    }
}

impl Default for SignatureCanvas {
    fn default() -> Self {
        Self::new()
    }
}
