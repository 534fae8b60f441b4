//! V4L2 camera source.
//!
//! Maps facing modes onto local device nodes (front → `front_device`, back →
//! `back_device`) and captures RGB frames through memory-mapped buffers.
//!
//! Open failures are classified for the user:
//! - permission refused → `CameraError::Denied`
//! - missing device node → `CameraError::NotFound`
//! - `EBUSY` → `CameraError::Busy`

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::io;

use super::{CameraSettings, CameraSource, FacingMode, VideoStream};
use crate::error::CameraError;
use crate::frame::Frame;

pub struct V4l2Camera {
    settings: CameraSettings,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }

    fn device_for(&self, facing: FacingMode) -> &str {
        match facing {
            FacingMode::Front => &self.settings.front_device,
            FacingMode::Back => &self.settings.back_device,
        }
    }
}

fn classify_io_error(err: &io::Error) -> CameraError {
    if err.raw_os_error() == Some(libc::EBUSY) {
        return CameraError::Busy;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => CameraError::Denied,
        io::ErrorKind::NotFound => CameraError::NotFound,
        _ => CameraError::Other(err.to_string()),
    }
}

impl CameraSource for V4l2Camera {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = self.device_for(facing).to_string();
        let mut device = v4l::Device::with_path(&path).map_err(|err| {
            log::warn!("V4l2Camera: failed to open {}: {}", path, err);
            classify_io_error(&err)
        })?;

        let mut format = device
            .format()
            .map_err(|err| classify_io_error(&err))?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device.format().map_err(|err| classify_io_error(&err))?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(CameraError::Other(format!(
                "{} does not support RGB3 capture",
                path
            )));
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| classify_io_error(&err))?;

        log::info!(
            "V4l2Camera: acquired {} camera {} ({}x{})",
            facing,
            path,
            format.width,
            format.height
        );
        Ok(Box::new(V4l2Stream {
            facing,
            device: path,
            width: format.width,
            height: format.height,
            state: Some(state),
        }))
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    facing: FacingMode,
    device: String,
    width: u32,
    height: u32,
    state: Option<DeviceState>,
}

impl VideoStream for V4l2Stream {
    fn facing_mode(&self) -> FacingMode {
        self.facing
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("stream on {} stopped", self.device))?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .with_context(|| format!("capture frame from {}", self.device))?;

        let expected = self.width as usize * self.height as usize * 3;
        if buf.len() < expected {
            // Partial buffer while the device settles.
            log::debug!(
                "V4l2Camera: short buffer from {} ({} < {})",
                self.device,
                buf.len(),
                expected
            );
            return Ok(None);
        }
        let mut pixels = buf;
        pixels.truncate(expected);
        Frame::new(pixels, self.width, self.height).map(Some)
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: released {}", self.device);
        }
    }
}
