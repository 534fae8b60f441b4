use serde::{Deserialize, Serialize};

/// Box in normalized 0..1 frame coordinates.
///
/// `x`/`y` are the box centre, `width`/`height` its extent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Pixel rectangle `(left, top, width, height)` on a canvas of the given size.
    pub fn to_pixels(&self, canvas_width: u32, canvas_height: u32) -> (i32, i32, u32, u32) {
        let cw = canvas_width as f32;
        let ch = canvas_height as f32;
        let w = (self.width * cw).round().max(1.0);
        let h = (self.height * ch).round().max(1.0);
        let left = (self.x * cw - w / 2.0).round() as i32;
        let top = (self.y * ch - h / 2.0).round() as i32;
        (left, top, w as u32, h as u32)
    }
}

/// One candidate object reported by the detector for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Score in 0..=1.
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Derived per frame from the current template. Detectors always report false.
    pub is_target_match: bool,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            is_target_match: false,
        }
    }

    /// Confidence as a rounded percentage.
    pub fn percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}
