//! Canvas the session loop draws frames and detection overlays onto.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0x43, 0x61, 0xee]);
const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([0xf7, 0x25, 0x85]);
const LABEL_ALPHA: f32 = 0.85;
const LABEL_HEIGHT: u32 = 30;
/// Approximate glyph advance used to size label bars.
const LABEL_CHAR_WIDTH: u32 = 9;
const BOX_THICKNESS: u32 = 3;
const TARGET_THICKNESS: u32 = 6;

pub struct Canvas {
    image: RgbImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Scale the frame to fill the canvas.
    pub fn draw_frame(&mut self, frame: &Frame) -> Result<()> {
        let source = frame.to_image()?;
        if source.dimensions() == self.image.dimensions() {
            self.image = source;
        } else {
            self.image = imageops::resize(
                &source,
                self.image.width(),
                self.image.height(),
                FilterType::Nearest,
            );
        }
        Ok(())
    }

    /// Stroke every detection; the target match gets the highlight colour.
    pub fn draw_detections(&mut self, detections: &[Detection]) {
        for detection in detections {
            let (color, thickness) = if detection.is_target_match {
                (HIGHLIGHT_COLOR, TARGET_THICKNESS)
            } else {
                (BOX_COLOR, BOX_THICKNESS)
            };
            self.stroke_box(&detection.bbox, color, thickness);
            self.draw_label_bar(&detection.bbox, &detection.label, color);
        }
    }

    /// Emphasize one detection (list selection).
    pub fn highlight(&mut self, bbox: &BoundingBox) {
        self.stroke_box(bbox, HIGHLIGHT_COLOR, TARGET_THICKNESS);
    }

    /// Write the canvas as PNG.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write capture {}", path.display()))
    }

    fn stroke_box(&mut self, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
        let (left, top, width, height) = bbox.to_pixels(self.width(), self.height());
        for inset in 0..thickness {
            let w = width.saturating_sub(2 * inset);
            let h = height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(left + inset as i32, top + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut self.image, rect, color);
        }
    }

    /// Translucent bar above the box, sized to the label.
    fn draw_label_bar(&mut self, bbox: &BoundingBox, label: &str, color: Rgb<u8>) {
        let (left, top, _, _) = bbox.to_pixels(self.width(), self.height());
        let bar_width = label.chars().count() as u32 * LABEL_CHAR_WIDTH + 30;
        let bar_top = top - LABEL_HEIGHT as i32;

        let rect = Rect::at(left, bar_top).of_size(bar_width, LABEL_HEIGHT);
        fill_blended(&mut self.image, rect, color, LABEL_ALPHA);
    }
}

/// Alpha-blend a solid colour into `base` inside `rect`, clipped to the image.
fn fill_blended(base: &mut RgbImage, rect: Rect, color: Rgb<u8>, alpha: f32) {
    let x0 = rect.left().max(0) as u32;
    let y0 = rect.top().max(0) as u32;
    let x1 = (rect.right().max(-1) + 1).min(base.width() as i32).max(0) as u32;
    let y1 = (rect.bottom().max(-1) + 1).min(base.height() as i32).max(0) as u32;
    let over = color.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let pixel = base.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = over[c] as f32 * alpha + pixel.0[c] as f32 * (1.0 - alpha);
                pixel.0[c] = blended.round() as u8;
            }
        }
    }
}
