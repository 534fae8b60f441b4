use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector used by the session loop.
///
/// The detector is a black box: it reports labelled boxes with a confidence and
/// nothing else. The session loop owns matching against the current template.
///
/// Calls are serialized by the session worker; an implementation never sees two
/// `detect` calls at once.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load weights and warm up. Called once, on the first session start.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame. Any number of detections, scores in 0..=1.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Extract template features from an encoded image.
    ///
    /// Returns 0 on success; any other status means the template was not accepted.
    fn set_template(&mut self, image: &[u8]) -> Result<i32>;
}
