//! Synthetic camera for `stub://` URLs.
//!
//! Special device names simulate acquisition failures:
//! - `stub://denied`: permission refused
//! - `stub://busy`: device held by another process
//! - `stub://missing`: no camera at all
//! - `stub://no-front`: only the back camera exists

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{CameraSource, FacingMode, VideoStream};
use crate::error::CameraError;
use crate::frame::Frame;

pub struct SyntheticCamera {
    url: String,
    width: u32,
    height: u32,
    /// Reads that return "not ready" at the start of each stream.
    startup_frames: u32,
    acquisitions: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new(url: &str, width: u32, height: u32) -> Self {
        Self {
            url: url.to_string(),
            width,
            height,
            startup_frames: 0,
            acquisitions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_startup_frames(mut self, frames: u32) -> Self {
        self.startup_frames = frames;
        self
    }

    /// Shared counter of successful acquisitions.
    pub fn acquisitions(&self) -> Arc<AtomicU64> {
        self.acquisitions.clone()
    }
}

impl CameraSource for SyntheticCamera {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError> {
        match self.url.as_str() {
            "stub://denied" => return Err(CameraError::Denied),
            "stub://busy" => return Err(CameraError::Busy),
            "stub://missing" => return Err(CameraError::NotFound),
            "stub://no-front" if facing == FacingMode::Front => {
                return Err(CameraError::NotFound)
            }
            _ => {}
        }
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::Other(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "SyntheticCamera: acquired {} camera on {} ({}x{})",
            facing,
            self.url,
            self.width,
            self.height
        );
        Ok(Box::new(SyntheticStream {
            facing,
            width: self.width,
            height: self.height,
            pending_startup: self.startup_frames,
            frame_count: 0,
            scene_state: 0,
            stopped: false,
        }))
    }
}

struct SyntheticStream {
    facing: FacingMode,
    width: u32,
    height: u32,
    pending_startup: u32,
    frame_count: u64,
    /// Simulated scene; changes occasionally to mimic objects moving through.
    scene_state: u8,
    stopped: bool,
}

impl SyntheticStream {
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let facing_offset: u64 = match self.facing {
            FacingMode::Front => 128,
            FacingMode::Back => 0,
        };

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64 + facing_offset)
                % 256) as u8;
        }
        pixels
    }
}

impl VideoStream for SyntheticStream {
    fn facing_mode(&self) -> FacingMode {
        self.facing
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.stopped {
            return Err(anyhow!("stream stopped"));
        }
        if self.pending_startup > 0 {
            self.pending_startup -= 1;
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height).map(Some)
    }

    fn stop(&mut self) {
        if !self.stopped {
            log::debug!("SyntheticCamera: {} stream stopped", self.facing);
        }
        self.stopped = true;
    }
}
