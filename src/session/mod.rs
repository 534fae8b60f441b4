//! Detection session controller.
//!
//! Owns the camera stream, the canvas and the detector for one detection UI, and
//! drives the acquire → render → detect → match → display loop.
//!
//! The host calls `tick(timestamp)` once per display frame. A tick never blocks on
//! the detector: an admitted tick draws the frame and queues it on the detection
//! worker; later ticks poll for the result. While a detection is in flight no
//! other frame is admitted, so at most one detect call exists at a time.
//!
//! Failure handling:
//! - camera and model failures abort `start()`/`switch_camera()` with a typed error
//! - detector failures during a tick are logged and the loop backs off, the
//!   session stays active
//! - `stop()` does not abort an in-flight detection; its result is dropped when it
//!   arrives
//! - a template the detector rejects after `start()` is reported by a later tick,
//!   and the last accepted template is selected again

mod worker;

use anyhow::anyhow;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::camera::{CameraSource, FacingMode, VideoStream};
use crate::detect::{Detection, Detector};
use crate::error::{ModelLoadError, SessionError};
use crate::frame::Frame;
use crate::matching::{clear_matches, MatchPolicy, TargetMatch};
use crate::render::Canvas;
use crate::template::Template;

use worker::{
    DetectionJob, DetectionWorker, SharedDetector, TemplateJob, TemplateOutcome, WorkerOutcome,
};

pub const DEFAULT_TARGET_FPS: u32 = 15;
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(1000);

/// Loop pacing and canvas size.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Minimum time between admitted frames.
    pub min_frame_interval: Duration,
    /// Pause after a failed tick before the next admission.
    pub error_backoff: Duration,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_frame_interval: frame_interval(DEFAULT_TARGET_FPS),
            error_backoff: DEFAULT_ERROR_BACKOFF,
            canvas_width: 640,
            canvas_height: 480,
        }
    }
}

pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
}

/// Session flags, owned by the controller.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub is_active: bool,
    pub facing_mode: FacingMode,
    /// Host timestamp of the last admitted frame.
    pub last_frame_timestamp: Option<Duration>,
    pub current_template: Option<Template>,
}

/// Result of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub seq: u64,
    /// Host timestamp the frame was admitted at.
    pub timestamp: Duration,
    pub detections: Vec<Detection>,
    pub target: Option<TargetMatch>,
    /// Time the detector spent on the frame.
    pub detect_time: Duration,
}

impl FrameReport {
    pub fn target_detection(&self) -> Option<&Detection> {
        self.target.and_then(|hit| self.detections.get(hit.index))
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Session not running; the host should stop scheduling ticks.
    Inactive,
    /// Gated by the frame interval or an error backoff.
    Throttled,
    /// The stream has no frame ready yet.
    NotReady,
    /// A frame was drawn and queued for detection.
    Submitted,
    /// The in-flight detection has not finished.
    Pending,
    Completed(FrameReport),
    /// The tick failed; the loop backs off and continues.
    Failed,
    /// The detector refused the newly selected template; the previously
    /// accepted one is current again.
    TemplateRejected(ModelLoadError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub frames_submitted: u64,
    pub frames_completed: u64,
    pub tick_failures: u64,
    pub stale_results: u64,
}

struct InFlight {
    seq: u64,
    frame: Arc<Frame>,
    timestamp: Duration,
    submitted_at: Instant,
}

pub struct SessionController {
    camera: Box<dyn CameraSource>,
    detector: SharedDetector,
    detector_initialized: bool,
    /// The detector holds, or has queued, the features of the current template.
    template_synced: bool,
    /// Bumped on every `set_template`.
    template_generation: u64,
    /// Last selection the detector accepted, with its generation.
    accepted_template: Option<Template>,
    accepted_generation: u64,
    templates_pending: usize,
    worker: Option<DetectionWorker>,
    stream: Option<Box<dyn VideoStream>>,
    state: SessionState,
    policy: MatchPolicy,
    settings: LoopSettings,
    canvas: Canvas,
    in_flight: Option<InFlight>,
    resume_at: Option<Duration>,
    next_seq: u64,
    last_report: Option<FrameReport>,
    stats: SessionStats,
}

impl SessionController {
    pub fn new<D: Detector + 'static>(
        camera: Box<dyn CameraSource>,
        detector: D,
        policy: MatchPolicy,
        settings: LoopSettings,
    ) -> Self {
        let canvas = Canvas::new(settings.canvas_width, settings.canvas_height);
        Self {
            camera,
            detector: Arc::new(Mutex::new(detector)),
            detector_initialized: false,
            template_synced: true,
            template_generation: 0,
            accepted_template: None,
            accepted_generation: 0,
            templates_pending: 0,
            worker: None,
            stream: None,
            state: SessionState::default(),
            policy,
            settings,
            canvas,
            in_flight: None,
            resume_at: None,
            next_seq: 0,
            last_report: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_facing_mode(mut self, facing: FacingMode) -> Self {
        self.state.facing_mode = facing;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Facing mode reported by the live stream.
    pub fn stream_facing_mode(&self) -> Option<FacingMode> {
        self.stream.as_ref().map(|stream| stream.facing_mode())
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.state.facing_mode
    }

    pub fn current_template(&self) -> Option<&Template> {
        self.state.current_template.as_ref()
    }

    pub fn detection_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Initialize the detector if needed, acquire the camera and go active.
    pub fn start(&mut self) -> Result<StartOutcome, SessionError> {
        if self.state.is_active {
            log::info!("session: already detecting");
            return Ok(StartOutcome::AlreadyActive);
        }

        self.ensure_detector()?;
        self.ensure_worker()?;

        let facing = self.state.facing_mode;
        let stream = self.camera.acquire(facing).map_err(|err| {
            log::warn!("session: camera acquisition failed: {}", err);
            err
        })?;

        log::info!("session: started with {} camera", stream.facing_mode());
        self.stream = Some(stream);
        self.in_flight = None;
        self.resume_at = None;
        self.state.last_frame_timestamp = None;
        self.state.is_active = true;
        Ok(StartOutcome::Started)
    }

    /// Go inactive and release the camera. Any in-flight result is discarded.
    pub fn stop(&mut self) {
        if !self.state.is_active && self.stream.is_none() {
            return;
        }
        self.state.is_active = false;
        if let Some(flight) = self.in_flight.take() {
            log::debug!("session: discarding in-flight detection #{}", flight.seq);
        }
        if let Some(stream) = self.stream.take() {
            self.camera.release(stream);
        }
        self.state.last_frame_timestamp = None;
        self.resume_at = None;
        log::info!("session: stopped");
    }

    /// Toggle between front and back cameras.
    pub fn switch_camera(&mut self) -> Result<FacingMode, SessionError> {
        let next = self.state.facing_mode.toggled();
        self.set_facing_mode(next)
    }

    /// Select a camera. With a live stream, the stream is re-acquired; if that
    /// fails the session stops.
    pub fn set_facing_mode(&mut self, facing: FacingMode) -> Result<FacingMode, SessionError> {
        self.state.facing_mode = facing;
        let Some(old) = self.stream.take() else {
            log::info!("session: {} camera selected for next start", facing);
            return Ok(facing);
        };
        self.camera.release(old);

        match self.camera.acquire(facing) {
            Ok(stream) => {
                log::info!("session: switched to {} camera", stream.facing_mode());
                self.stream = Some(stream);
                Ok(facing)
            }
            Err(err) => {
                log::warn!("session: failed to switch to {} camera: {}", facing, err);
                self.stop();
                Err(err.into())
            }
        }
    }

    /// Change the template being searched for.
    ///
    /// Before the detector is initialized the selection is only recorded and
    /// handed over on `start()`. After that the template is queued on the
    /// detection worker behind any in-flight detection; a rejection shows up as
    /// `TickOutcome::TemplateRejected` on a later tick.
    pub fn set_template(&mut self, template: Option<Template>) -> Result<(), SessionError> {
        self.template_generation += 1;
        let generation = self.template_generation;
        match &template {
            Some(template) if self.detector_initialized => {
                self.ensure_worker()?;
                let queued = match &self.worker {
                    Some(worker) => worker.submit_template(TemplateJob {
                        generation,
                        template: template.clone(),
                    }),
                    None => Err(anyhow!("detection worker not running")),
                };
                if let Err(err) = queued {
                    self.drop_worker();
                    return Err(ModelLoadError::new(format!("{err:#}")).into());
                }
                self.templates_pending += 1;
                self.template_synced = true;
            }
            Some(_) => self.template_synced = false,
            None => {
                self.template_synced = true;
                self.accepted_template = None;
                self.accepted_generation = generation;
            }
        }
        match &template {
            Some(t) => log::info!("session: current template '{}'", t.name),
            None => log::info!("session: template cleared"),
        }
        self.state.current_template = template;
        Ok(())
    }

    /// Run one loop iteration at host time `now`.
    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        if let Some(outcome) = self.poll_worker(now) {
            return outcome;
        }
        if !self.state.is_active {
            return TickOutcome::Inactive;
        }
        if self.in_flight.is_some() {
            return TickOutcome::Pending;
        }

        if let Some(resume_at) = self.resume_at {
            if now < resume_at {
                return TickOutcome::Throttled;
            }
            self.resume_at = None;
        }
        if let Some(last) = self.state.last_frame_timestamp {
            if now
                .checked_sub(last)
                .is_some_and(|elapsed| elapsed < self.settings.min_frame_interval)
            {
                return TickOutcome::Throttled;
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return TickOutcome::Inactive;
        };
        let frame = match stream.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::NotReady,
            Err(err) => return self.fail_tick(now, &format!("failed to read frame: {err:#}")),
        };
        self.state.last_frame_timestamp = Some(now);

        if let Err(err) = self.canvas.draw_frame(&frame) {
            log::warn!("session: failed to draw frame: {:#}", err);
        }

        if let Err(err) = self.ensure_worker() {
            return self.fail_tick(now, &err.message);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Arc::new(frame);
        let submitted = match &self.worker {
            Some(worker) => worker.submit(DetectionJob {
                seq,
                frame: frame.clone(),
            }),
            None => Err(anyhow!("detection worker not running")),
        };
        if let Err(err) = submitted {
            self.drop_worker();
            return self.fail_tick(now, &format!("{err:#}"));
        }

        self.stats.frames_submitted += 1;
        self.in_flight = Some(InFlight {
            seq,
            frame,
            timestamp: now,
            submitted_at: Instant::now(),
        });
        TickOutcome::Submitted
    }

    /// Flash a detection from the last report on the canvas.
    pub fn highlight(&mut self, index: usize) -> Option<Detection> {
        let detection = self.last_report.as_ref()?.detections.get(index)?.clone();
        self.canvas.highlight(&detection.bbox);
        Some(detection)
    }

    /// Save the canvas as PNG.
    pub fn capture(&self, path: &Path) -> anyhow::Result<()> {
        self.canvas.save_png(path)?;
        log::info!("session: capture written to {}", path.display());
        Ok(())
    }

    /// Stop and wait for the detection worker to exit.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.stop();
        match self.worker.take() {
            Some(worker) => worker.shutdown(),
            None => Ok(()),
        }
    }

    fn ensure_detector(&mut self) -> Result<(), ModelLoadError> {
        if self.detector_initialized && self.template_synced {
            return Ok(());
        }
        let mut guard = self
            .detector
            .lock()
            .map_err(|_| ModelLoadError::new("detector lock poisoned"))?;
        if !self.detector_initialized {
            log::info!("session: loading detector '{}'", guard.name());
            guard
                .initialize()
                .map_err(|e| ModelLoadError::new(format!("{e:#}")))?;
            self.detector_initialized = true;
        }
        if let Some(template) = &self.state.current_template {
            push_template(&mut *guard, template)?;
            self.accepted_template = Some(template.clone());
            self.accepted_generation = self.template_generation;
        }
        self.template_synced = true;
        Ok(())
    }

    fn ensure_worker(&mut self) -> Result<(), ModelLoadError> {
        if self.worker.is_none() {
            let worker = DetectionWorker::spawn(self.detector.clone())
                .map_err(|e| ModelLoadError::new(format!("{e:#}")))?;
            self.worker = Some(worker);
        }
        Ok(())
    }

    /// Forget a dead worker. Queued template changes died with it, so the
    /// current template is pushed again on the next `start()`.
    fn drop_worker(&mut self) {
        self.worker = None;
        self.in_flight = None;
        if self.templates_pending > 0 {
            self.templates_pending = 0;
            self.template_synced = false;
        }
    }

    /// Drain worker outcomes until one needs reporting or nothing is awaited.
    fn poll_worker(&mut self, now: Duration) -> Option<TickOutcome> {
        while self.in_flight.is_some() || self.templates_pending > 0 {
            let polled = match &self.worker {
                Some(worker) => worker.try_result(),
                None => Err(anyhow!("detection worker not running")),
            };
            let outcome = match polled {
                Ok(Some(outcome)) => outcome,
                Ok(None) => return None,
                Err(err) => {
                    self.drop_worker();
                    return Some(self.fail_tick(now, &format!("{err:#}")));
                }
            };

            let outcome = match outcome {
                WorkerOutcome::Template(ack) => {
                    self.templates_pending = self.templates_pending.saturating_sub(1);
                    if let Err(err) = self.settle_template(ack) {
                        return Some(TickOutcome::TemplateRejected(err));
                    }
                    continue;
                }
                WorkerOutcome::Detection(outcome) => outcome,
            };

            let expected = self.in_flight.as_ref().map(|flight| flight.seq);
            if expected != Some(outcome.seq) {
                self.stats.stale_results += 1;
                log::debug!("session: dropping stale detection #{}", outcome.seq);
                continue;
            }
            let flight = self.in_flight.take()?;

            return Some(match outcome.result {
                Ok(detections) => {
                    TickOutcome::Completed(self.complete(flight, detections, outcome.elapsed))
                }
                Err(message) => self.fail_tick(now, &message),
            });
        }
        None
    }

    fn settle_template(&mut self, ack: TemplateOutcome) -> Result<(), ModelLoadError> {
        match ack.result {
            Ok(()) => {
                if ack.generation > self.accepted_generation {
                    self.accepted_template = Some(ack.template);
                    self.accepted_generation = ack.generation;
                }
                Ok(())
            }
            Err(err) if ack.generation == self.template_generation => {
                log::warn!("session: {}", err);
                let fallback = self.accepted_template.clone();
                match &fallback {
                    Some(t) => log::info!("session: current template '{}' restored", t.name),
                    None => log::info!("session: template cleared"),
                }
                self.state.current_template = fallback;
                Err(err)
            }
            Err(err) => {
                log::debug!("session: superseded template rejected: {}", err);
                Ok(())
            }
        }
    }

    fn complete(
        &mut self,
        flight: InFlight,
        mut detections: Vec<Detection>,
        detect_time: Duration,
    ) -> FrameReport {
        let target = match &self.state.current_template {
            Some(template) => self.policy.apply(&template.name, &mut detections),
            None => {
                clear_matches(&mut detections);
                None
            }
        };

        if let Err(err) = self.canvas.draw_frame(&flight.frame) {
            log::warn!("session: failed to redraw frame: {:#}", err);
        }
        self.canvas.draw_detections(&detections);

        if let (Some(hit), Some(template)) = (target, &self.state.current_template) {
            log::debug!(
                "session: '{}' matched '{}' ({:?})",
                template.name,
                detections[hit.index].label,
                hit.rule
            );
        }
        log::debug!(
            "session: frame #{} {} detections in {:?} (submit→done {:?})",
            flight.seq,
            detections.len(),
            detect_time,
            flight.submitted_at.elapsed()
        );

        self.stats.frames_completed += 1;
        let report = FrameReport {
            seq: flight.seq,
            timestamp: flight.timestamp,
            detections,
            target,
            detect_time,
        };
        self.last_report = Some(report.clone());
        report
    }

    fn fail_tick(&mut self, now: Duration, message: &str) -> TickOutcome {
        self.stats.tick_failures += 1;
        log::warn!(
            "session: detection failed: {}; retrying in {:?}",
            message,
            self.settings.error_backoff
        );
        self.resume_at = Some(now + self.settings.error_backoff);
        TickOutcome::Failed
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_template(detector: &mut dyn Detector, template: &Template) -> Result<(), ModelLoadError> {
    let image = template
        .image_bytes()
        .map_err(|e| ModelLoadError::new(format!("{e:#}")))?;
    let status = detector
        .set_template(&image)
        .map_err(|e| ModelLoadError::new(format!("{e:#}")))?;
    if status != 0 {
        return Err(ModelLoadError::new(format!(
            "template '{}' rejected by detector (status {})",
            template.name, status
        )));
    }
    Ok(())
}
