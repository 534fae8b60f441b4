//! Application glue between voice commands, the template gallery and the
//! detection session.
//!
//! Every user-visible outcome goes through the `Announcer`: speech for
//! hands-free use, notices for the screen. The host drives `on_tick` once per
//! display frame, or hands the app to `run` which paces ticks itself.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::announce::{Announcer, NoticeLevel};
use crate::camera::FacingMode;
use crate::detect::Detection;
use crate::error::{SessionError, StorageError};
use crate::gallery::{SaveReport, TemplateGallery};
use crate::session::{FrameReport, SessionController, StartOutcome, TickOutcome};
use crate::template::Template;
use crate::voice::{VoiceCommand, UNKNOWN_COMMAND_HINT};

/// Host display frame period used by `run`.
pub const HOST_FRAME: Duration = Duration::from_millis(16);

pub struct App {
    session: SessionController,
    gallery: TemplateGallery,
    announcer: Box<dyn Announcer>,
    capture_dir: PathBuf,
    /// Whether the previous completed frame contained the target.
    target_in_view: bool,
}

impl App {
    pub fn new(
        session: SessionController,
        gallery: TemplateGallery,
        announcer: Box<dyn Announcer>,
    ) -> Self {
        Self {
            session,
            gallery,
            announcer,
            capture_dir: PathBuf::from("."),
            target_in_view: false,
        }
    }

    /// Directory voice-triggered captures are written to.
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn gallery(&self) -> &TemplateGallery {
        &self.gallery
    }

    /// Load saved templates and select the most recently added one.
    pub fn load_templates(&mut self) -> usize {
        if let Err(err) = self.gallery.load() {
            self.announcer.notice(
                NoticeLevel::Warning,
                &format!("Failed to load saved templates: {err}"),
            );
        }
        if let Some(latest) = self.gallery.latest().cloned() {
            let _ = self.apply_template(Some(latest));
        }
        self.gallery.len()
    }

    pub fn start(&mut self) -> Result<StartOutcome, SessionError> {
        match self.session.start() {
            Ok(StartOutcome::Started) => {
                self.target_in_view = false;
                self.announcer
                    .notice(NoticeLevel::Success, "Camera started");
                self.announcer.speak("Camera started, detection running");
                Ok(StartOutcome::Started)
            }
            Ok(StartOutcome::AlreadyActive) => {
                self.announcer
                    .notice(NoticeLevel::Info, "Detection already running");
                Ok(StartOutcome::AlreadyActive)
            }
            Err(err) => {
                log::warn!("app: start failed: {}", err);
                self.report_session_error(&err);
                Err(err)
            }
        }
    }

    pub fn stop(&mut self) {
        if self.session.is_active() {
            self.session.stop();
            self.announcer.notice(NoticeLevel::Info, "Detection stopped");
        }
        self.target_in_view = false;
    }

    /// Dispatch one recognized utterance.
    pub fn handle_utterance(&mut self, text: &str) -> VoiceCommand {
        let command = VoiceCommand::parse(text);
        log::info!("app: heard {:?} -> {:?}", text, command);

        if command.needs_session() && !self.session.is_active() {
            self.announcer.speak("Please start detection first");
            let _ = self.start();
            return command;
        }

        match &command {
            VoiceCommand::StartDetection => {
                if self.start().is_ok() {
                    self.announcer.speak("Detection mode ready");
                }
            }
            VoiceCommand::Find(item) => {
                let _ = self.find_and_apply(item);
            }
            VoiceCommand::SwitchCamera => {
                let _ = self.switch_camera();
            }
            VoiceCommand::Capture => {
                let _ = self.capture_to_dir();
            }
            VoiceCommand::ReadResults => self.read_results(),
            VoiceCommand::Unknown => self.announcer.speak(UNKNOWN_COMMAND_HINT),
        }
        command
    }

    /// Search for the template named `item`, starting detection if needed.
    ///
    /// `Ok(None)` when no template matches the name.
    pub fn find_and_apply(&mut self, item: &str) -> Result<Option<Template>, SessionError> {
        let Some(template) = self.gallery.find_by_name(item).cloned() else {
            self.announcer.speak(&format!(
                "No template for {item}. Upload a photo of it first."
            ));
            return Ok(None);
        };

        self.apply_template(Some(template.clone()))?;
        self.announcer
            .speak(&format!("Searching for {}", template.name));
        if !self.session.is_active() {
            self.start()?;
        }
        Ok(Some(template))
    }

    pub fn switch_camera(&mut self) -> Result<FacingMode, SessionError> {
        match self.session.switch_camera() {
            Ok(facing) => {
                self.target_in_view = false;
                self.announcer
                    .speak(&format!("Switched to the {facing} camera"));
                Ok(facing)
            }
            Err(err) => {
                log::warn!("app: camera switch failed: {}", err);
                self.report_session_error(&err);
                Err(err)
            }
        }
    }

    /// Create a template from an uploaded image, save it and make it current.
    pub fn upload_template(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
        image: &[u8],
    ) -> Result<Template> {
        let template = match Template::new(name, category, description, image) {
            Ok(template) => template,
            Err(err) => {
                self.announcer
                    .notice(NoticeLevel::Danger, &format!("Template upload failed: {err}"));
                return Err(err);
            }
        };

        match self.gallery.add(template.clone()) {
            Ok(report) => self.report_dropped(&report),
            Err(err) => {
                self.report_storage_error(&err);
                return Err(err).context("failed to save template");
            }
        }

        self.apply_template(Some(template.clone()))
            .context("template saved but could not be selected")?;
        self.announcer
            .notice(NoticeLevel::Success, "Template uploaded");
        Ok(template)
    }

    pub fn select_template(&mut self, id: &str) -> Result<Template> {
        let template = self
            .gallery
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("no template with id {id}"))?;
        self.apply_template(Some(template.clone()))?;
        Ok(template)
    }

    /// Delete a template. When the current template is no longer in the gallery
    /// the first remaining one is selected, or none.
    pub fn delete_template(&mut self, id: &str) -> Result<Option<Template>, StorageError> {
        let removed = match self.gallery.remove(id) {
            Ok(removed) => removed,
            Err(err) => {
                self.report_storage_error(&err);
                return Err(err);
            }
        };
        let Some((removed, report)) = removed else {
            return Ok(None);
        };
        self.report_dropped(&report);

        let current_gone = self
            .session
            .current_template()
            .is_some_and(|current| self.gallery.get(&current.id).is_none());
        if current_gone {
            let next = self.gallery.list().first().cloned();
            let _ = self.apply_template(next);
        }
        self.announcer.notice(NoticeLevel::Info, "Template deleted");
        Ok(Some(removed))
    }

    /// Speak the detections of the last processed frame.
    pub fn read_results(&mut self) {
        let text = match self.session.last_report() {
            Some(report) if !report.detections.is_empty() => {
                describe_detections(&report.detections)
            }
            _ => "No objects detected".to_string(),
        };
        self.announcer.speak(&text);
    }

    /// Flash one detection of the last frame and speak it.
    pub fn highlight(&mut self, index: usize) -> Option<Detection> {
        let detection = self.session.highlight(index)?;
        self.announcer.speak(&format!(
            "Detected {}, confidence {}%",
            detection.label,
            detection.percent()
        ));
        Some(detection)
    }

    pub fn capture(&mut self, path: &Path) -> Result<()> {
        match self.session.capture(path) {
            Ok(()) => {
                self.announcer
                    .notice(NoticeLevel::Success, "Detection frame saved");
                self.announcer.speak("Image saved");
                Ok(())
            }
            Err(err) => {
                self.announcer
                    .notice(NoticeLevel::Danger, &format!("Capture failed: {err:#}"));
                Err(err)
            }
        }
    }

    /// Capture into the capture directory under a timestamped name.
    pub fn capture_to_dir(&mut self) -> Result<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = self
            .capture_dir
            .join(format!("visionseek-capture-{millis}.png"));
        self.capture(&path)?;
        Ok(path)
    }

    /// Advance the session; announces the target when it comes into view.
    pub fn on_tick(&mut self, now: Duration) -> TickOutcome {
        let outcome = self.session.tick(now);
        match &outcome {
            TickOutcome::Completed(report) => {
                match (report.target_detection(), self.session.current_template()) {
                    (Some(hit), Some(template)) => {
                        if !self.target_in_view {
                            let text =
                                format!("Found {}, confidence {}%", template.name, hit.percent());
                            self.announcer.speak(&text);
                        }
                        self.target_in_view = true;
                    }
                    _ => self.target_in_view = false,
                }
            }
            TickOutcome::TemplateRejected(err) => {
                log::warn!("app: template rejected: {}", err);
                self.target_in_view = false;
                self.report_session_error(&SessionError::ModelLoad(err.clone()));
            }
            _ => {}
        }
        outcome
    }

    /// Tick at host frame pace, dispatching utterances, until `shutdown` is set.
    /// `observe` sees every completed frame.
    pub fn run(
        &mut self,
        utterances: &Receiver<String>,
        shutdown: &AtomicBool,
        mut observe: impl FnMut(&FrameReport),
    ) -> Result<()> {
        let clock = Instant::now();
        let mut listening = true;
        while !shutdown.load(Ordering::SeqCst) {
            while listening {
                match utterances.try_recv() {
                    Ok(text) => {
                        self.handle_utterance(&text);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::debug!("app: utterance source closed");
                        listening = false;
                    }
                }
            }
            if let TickOutcome::Completed(report) = self.on_tick(clock.elapsed()) {
                observe(&report);
            }
            std::thread::sleep(HOST_FRAME);
        }
        self.stop();
        Ok(())
    }

    /// Stop and join the detection worker.
    pub fn shutdown(self) -> Result<()> {
        self.session.shutdown()
    }

    fn apply_template(&mut self, template: Option<Template>) -> Result<(), SessionError> {
        if let Err(err) = self.session.set_template(template) {
            log::warn!("app: template rejected: {}", err);
            self.report_session_error(&err);
            return Err(err);
        }
        self.target_in_view = false;
        Ok(())
    }

    fn report_session_error(&mut self, err: &SessionError) {
        let message = err.user_message();
        self.announcer.notice(NoticeLevel::Danger, &message);
        self.announcer.speak(&message);
    }

    fn report_dropped(&mut self, report: &SaveReport) {
        for dropped in &report.dropped {
            log::info!("app: template '{}' dropped from gallery", dropped.name);
        }
        if report.degraded {
            let names: Vec<&str> = report.dropped.iter().map(|t| t.name.as_str()).collect();
            self.announcer.notice(
                NoticeLevel::Warning,
                &format!(
                    "Storage is full; only the {} most recent templates were kept (removed: {})",
                    self.gallery.len(),
                    names.join(", ")
                ),
            );
        }
    }

    fn report_storage_error(&mut self, err: &StorageError) {
        self.announcer
            .notice(NoticeLevel::Warning, &format!("Failed to save templates: {err}"));
    }
}

fn describe_detections(detections: &[Detection]) -> String {
    let mut text = format!("Detected {} objects.", detections.len());
    for (i, detection) in detections.iter().enumerate() {
        text.push_str(&format!(
            " {}: {}, confidence {}%.",
            i + 1,
            detection.label,
            detection.percent()
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc, Mutex};

    use crate::camera::SyntheticCamera;
    use crate::detect::{BoundingBox, Detector};
    use crate::frame::Frame;
    use crate::matching::MatchPolicy;
    use crate::session::LoopSettings;
    use crate::storage::MemoryTemplateStore;
    use crate::template::tests::PNG_MAGIC;

    #[derive(Clone, Default)]
    struct Recorder {
        spoken: Arc<Mutex<Vec<String>>>,
        notices: Arc<Mutex<Vec<(NoticeLevel, String)>>>,
    }

    impl Recorder {
        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        fn said(&self, needle: &str) -> bool {
            self.spoken().iter().any(|s| s.contains(needle))
        }

        fn notices(&self) -> Vec<(NoticeLevel, String)> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Announcer for Recorder {
        fn speak(&mut self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }

        fn notice(&mut self, level: NoticeLevel, message: &str) {
            self.notices
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    /// Reports the same detections for every frame.
    struct FixedDetector(Vec<Detection>);

    impl Detector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
            Ok(self.0.clone())
        }

        fn set_template(&mut self, _image: &[u8]) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    /// Accepts no template.
    struct RejectingDetector;

    impl Detector for RejectingDetector {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn set_template(&mut self, _image: &[u8]) -> anyhow::Result<i32> {
            Ok(4)
        }
    }

    fn app_with(url: &str, detections: Vec<Detection>) -> (App, Recorder) {
        app_using(url, FixedDetector(detections))
    }

    fn app_using<D: Detector + 'static>(url: &str, detector: D) -> (App, Recorder) {
        let session = SessionController::new(
            Box::new(SyntheticCamera::new(url, 16, 12)),
            detector,
            MatchPolicy::default(),
            LoopSettings {
                canvas_width: 16,
                canvas_height: 12,
                ..LoopSettings::default()
            },
        );
        let gallery = TemplateGallery::new(Box::new(MemoryTemplateStore::new()));
        let recorder = Recorder::default();
        let app = App::new(session, gallery, Box::new(recorder.clone()));
        (app, recorder)
    }

    fn app(detections: Vec<Detection>) -> (App, Recorder) {
        app_with("stub://test", detections)
    }

    fn bottle() -> Detection {
        Detection::new("bottle", 0.95, BoundingBox::new(0.5, 0.5, 0.3, 0.3))
    }

    /// Tick with advancing host time until `frames` frames completed.
    fn run_frames(app: &mut App, frames: usize) -> Vec<FrameReport> {
        let mut reports = Vec::new();
        let mut now = Duration::ZERO;
        for _ in 0..5000 {
            if let TickOutcome::Completed(report) = app.on_tick(now) {
                reports.push(report);
                if reports.len() == frames {
                    return reports;
                }
            }
            now += Duration::from_millis(100);
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("only {} of {} frames completed", reports.len(), frames);
    }

    #[test]
    fn find_applies_template_and_starts_detection() {
        let (mut app, recorder) = app(vec![]);
        app.upload_template("Water Bottle", "drink", "", PNG_MAGIC).unwrap();
        app.upload_template("keys", "", "", PNG_MAGIC).unwrap();

        let command = app.handle_utterance("寻找water bottle");
        assert_eq!(command, VoiceCommand::Find("water bottle".into()));
        assert_eq!(app.session().current_template().unwrap().name, "Water Bottle");
        assert!(app.session().is_active());
        assert!(recorder.said("Searching for Water Bottle"));
    }

    #[test]
    fn find_without_template_only_announces() {
        let (mut app, recorder) = app(vec![]);
        assert!(app.find_and_apply("umbrella").unwrap().is_none());
        assert!(recorder.said("No template for umbrella"));
        assert!(!app.session().is_active());
    }

    #[test]
    fn find_returns_the_model_error_when_template_is_refused() {
        let (mut app, recorder) = app_using("stub://test", RejectingDetector);
        app.upload_template("keys", "", "", PNG_MAGIC).unwrap();

        let err = app.find_and_apply("keys").unwrap_err();
        assert!(matches!(err, SessionError::ModelLoad(_)));
        assert!(!app.session().is_active());
        assert!(recorder.said("Failed to load the detection model"));
    }

    #[test]
    fn template_refused_while_running_is_reported() {
        let (mut app, recorder) = app_using("stub://test", RejectingDetector);
        app.start().unwrap();
        app.upload_template("keys", "", "", PNG_MAGIC).unwrap();
        assert_eq!(app.session().current_template().unwrap().name, "keys");

        let mut now = Duration::ZERO;
        let mut rejected = false;
        for _ in 0..2000 {
            if let TickOutcome::TemplateRejected(_) = app.on_tick(now) {
                rejected = true;
                break;
            }
            now += Duration::from_millis(100);
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(rejected);
        assert!(app.session().current_template().is_none());
        assert!(recorder.said("Failed to load the detection model"));
        assert!(recorder
            .notices()
            .iter()
            .any(|(level, _)| *level == NoticeLevel::Danger));
    }

    #[test]
    fn session_commands_start_detection_first() {
        let (mut app, recorder) = app(vec![]);
        app.handle_utterance("read results");
        assert!(recorder.said("Please start detection first"));
        assert!(app.session().is_active());
    }

    #[test]
    fn target_is_announced_once_per_appearance() {
        let (mut app, recorder) = app(vec![bottle()]);
        app.upload_template("water bottle", "", "", PNG_MAGIC).unwrap();
        app.start().unwrap();

        let reports = run_frames(&mut app, 3);
        assert!(reports.iter().all(|r| r.target.is_some()));
        let found = recorder
            .spoken()
            .iter()
            .filter(|s| s.starts_with("Found water bottle"))
            .count();
        assert_eq!(found, 1);
    }

    #[test]
    fn deleting_current_template_selects_first_remaining() {
        let (mut app, _recorder) = app(vec![]);
        let first = app.upload_template("wallet", "", "", PNG_MAGIC).unwrap();
        let second = app.upload_template("phone", "", "", PNG_MAGIC).unwrap();
        assert_eq!(app.session().current_template().unwrap().id, second.id);

        app.delete_template(&second.id).unwrap();
        assert_eq!(app.session().current_template().unwrap().id, first.id);

        app.delete_template(&first.id).unwrap();
        assert!(app.session().current_template().is_none());
        assert!(app.delete_template("missing").unwrap().is_none());
    }

    #[test]
    fn start_failure_reports_the_camera_cause() {
        let (mut app, recorder) = app_with("stub://denied", vec![]);
        let err = app.start().unwrap_err();
        assert!(matches!(err, SessionError::Camera(crate::error::CameraError::Denied)));
        assert!(recorder.said("Camera access was denied"));
        assert!(recorder
            .notices()
            .iter()
            .any(|(level, _)| *level == NoticeLevel::Danger));
    }

    #[test]
    fn read_results_lists_each_detection() {
        let (mut app, recorder) = app(vec![
            bottle(),
            Detection::new("cup", 0.5, BoundingBox::new(0.2, 0.2, 0.1, 0.1)),
        ]);
        app.read_results();
        assert!(recorder.said("No objects detected"));

        app.start().unwrap();
        run_frames(&mut app, 1);
        app.read_results();
        assert!(recorder.said(
            "Detected 2 objects. 1: bottle, confidence 95%. 2: cup, confidence 50%."
        ));
    }

    #[test]
    fn invalid_upload_is_rejected_with_notice() {
        let (mut app, recorder) = app(vec![]);
        assert!(app.upload_template("notes", "", "", b"plain text").is_err());
        assert!(app.gallery().is_empty());
        assert_eq!(recorder.notices()[0].0, NoticeLevel::Danger);
    }

    #[test]
    fn load_selects_latest_template() {
        let mut store = MemoryTemplateStore::new();
        let older = Template::new("mug", "", "", PNG_MAGIC).unwrap();
        let newer = Template::new("glasses", "", "", PNG_MAGIC).unwrap();
        crate::storage::TemplateStore::save(&mut store, &[older, newer.clone()]).unwrap();

        let (app, _) = app(vec![]);
        let App { session, announcer, .. } = app;
        let mut app = App::new(
            session,
            TemplateGallery::new(Box::new(store)),
            announcer,
        );
        assert_eq!(app.load_templates(), 2);
        assert_eq!(app.session().current_template().unwrap().id, newer.id);
    }

    #[test]
    fn capture_writes_png_and_announces() {
        let dir = tempfile::tempdir().unwrap();
        let (app, recorder) = app(vec![]);
        let mut app = app.with_capture_dir(dir.path());
        app.start().unwrap();
        let path = app.capture_to_dir().unwrap();
        assert!(path.exists());
        assert!(recorder.said("Image saved"));
    }

    #[test]
    fn run_dispatches_utterances_until_shutdown() {
        let (mut app, recorder) = app(vec![bottle()]);
        let (tx, rx) = mpsc::channel();
        tx.send("start detection".to_string()).unwrap();
        drop(tx);

        let shutdown = AtomicBool::new(false);
        let mut frames = 0;
        app.run(&rx, &shutdown, |_| {
            frames += 1;
            if frames == 2 {
                shutdown.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

        assert_eq!(frames, 2);
        assert!(recorder.said("Detection mode ready"));
        assert!(!app.session().is_active());
    }
}
