use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Labels the placeholder detector draws from.
pub const MOCK_CLASSES: [&str; 7] = [
    "person", "cup", "cell phone", "glasses", "backpack", "laptop", "book",
];

/// Placeholder detector. Reports 1-3 random detections per frame.
///
/// There is no model behind it: scores, labels and boxes are random. It exists so
/// the session loop can be exercised end to end without an inference backend.
pub struct RandomDetector {
    rng: StdRng,
    initialized: bool,
    template_class: Option<&'static str>,
}

impl RandomDetector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            initialized: false,
            template_class: None,
        }
    }

    /// Deterministic output for tests and demos.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Class the last template was (randomly) assigned.
    pub fn template_class(&self) -> Option<&'static str> {
        self.template_class
    }
}

impl Default for RandomDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for RandomDetector {
    fn name(&self) -> &'static str {
        "random"
    }

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        log::info!("RandomDetector: initialized");
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if !self.initialized {
            log::warn!("RandomDetector: detect before initialize, initializing now");
            self.initialize()?;
        }
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame"));
        }

        let count = self.rng.gen_range(1..=3);
        let detections = (0..count)
            .map(|_| {
                let label = MOCK_CLASSES[self.rng.gen_range(0..MOCK_CLASSES.len())];
                let bbox = BoundingBox::new(
                    self.rng.gen_range(0.1..0.9),
                    self.rng.gen_range(0.1..0.9),
                    self.rng.gen_range(0.1..0.4),
                    self.rng.gen_range(0.1..0.4),
                );
                Detection::new(label, self.rng.gen_range(0.5..1.0), bbox)
            })
            .collect::<Vec<_>>();

        log::debug!("RandomDetector: {} detections", detections.len());
        Ok(detections)
    }

    fn set_template(&mut self, image: &[u8]) -> Result<i32> {
        if image.is_empty() {
            return Ok(1);
        }
        let class = MOCK_CLASSES[self.rng.gen_range(0..MOCK_CLASSES.len())];
        self.template_class = Some(class);
        log::info!("RandomDetector: template features extracted (class {})", class);
        Ok(0)
    }
}
