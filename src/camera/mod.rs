//! Camera sources.
//!
//! A `CameraSource` hands out one `VideoStream` per acquisition:
//! - Synthetic `stub://` cameras (tests, demos)
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! Acquisition failures are reported as `CameraError` so the session can give the
//! user a distinct message per cause. Streams are released explicitly; dropping a
//! stream also stops it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CameraError;
use crate::frame::Frame;

pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Which camera to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// User-facing camera.
    Front,
    /// Environment-facing camera.
    #[default]
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::Front => write!(f, "front"),
            FacingMode::Back => write!(f, "back"),
        }
    }
}

impl FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "front" | "user" => Ok(FacingMode::Front),
            "back" | "rear" | "environment" => Ok(FacingMode::Back),
            other => Err(anyhow::anyhow!("unknown facing mode '{}'", other)),
        }
    }
}

/// Live stream from an acquired camera.
pub trait VideoStream: Send {
    fn facing_mode(&self) -> FacingMode;

    /// Next frame, or `None` while the stream has no frame ready yet.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Stop all tracks. Further reads fail.
    fn stop(&mut self);
}

/// Provider of video streams.
pub trait CameraSource: Send {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError>;

    fn release(&mut self, mut stream: Box<dyn VideoStream>) {
        stream.stop();
    }
}

/// Camera selection from configuration.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// `stub://...` for a synthetic camera, `v4l2` for local devices.
    pub url: String,
    pub front_device: String,
    pub back_device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            front_device: "/dev/video1".to_string(),
            back_device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Build the camera source named by `settings.url`.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn CameraSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(
            &settings.url,
            settings.width,
            settings.height,
        )));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        if settings.url == "v4l2" {
            return Ok(Box::new(V4l2Camera::new(settings.clone())));
        }
    }
    Err(anyhow::anyhow!(
        "unsupported camera '{}' (use stub://... or enable the camera-v4l2 feature)",
        settings.url
    ))
}
