use std::sync::{Arc, Mutex};
use std::time::Duration;

use visionseek::{
    Announcer, App, CameraError, FacingMode, LoopSettings, MatchPolicy, MemoryTemplateStore,
    NoticeLevel, RandomDetector, SessionController, SessionError, SqliteTemplateStore, Template,
    TemplateGallery, TemplateStore, TickOutcome,
};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n0000";

#[derive(Clone, Default)]
struct Transcript(Arc<Mutex<Vec<String>>>);

impl Transcript {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Announcer for Transcript {
    fn speak(&mut self, text: &str) {
        self.0.lock().unwrap().push(format!("say: {text}"));
    }

    fn notice(&mut self, level: NoticeLevel, message: &str) {
        self.0.lock().unwrap().push(format!("{level}: {message}"));
    }
}

fn session(url: &str) -> SessionController {
    SessionController::new(
        synthetic(url),
        RandomDetector::seeded(42),
        MatchPolicy::default(),
        LoopSettings {
            canvas_width: 64,
            canvas_height: 48,
            ..LoopSettings::default()
        },
    )
}

fn synthetic(url: &str) -> Box<dyn visionseek::CameraSource> {
    Box::new(visionseek::camera::SyntheticCamera::new(url, 64, 48))
}

fn tick_until_frames(ctrl: &mut SessionController, frames: usize) -> Vec<visionseek::FrameReport> {
    let mut reports = Vec::new();
    let mut now = Duration::ZERO;
    for _ in 0..10_000 {
        if let TickOutcome::Completed(report) = ctrl.tick(now) {
            reports.push(report);
            if reports.len() == frames {
                return reports;
            }
        }
        now += Duration::from_millis(70);
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("only {} frames completed", reports.len());
}

#[test]
fn random_detector_session_produces_frames() {
    let mut ctrl = session("stub://kitchen");
    ctrl.start().unwrap();

    let reports = tick_until_frames(&mut ctrl, 5);
    for report in &reports {
        assert!((1..=3).contains(&report.detections.len()));
        assert!(report.target.is_none());
    }
    let seqs: Vec<_> = reports.iter().map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ctrl.stats().frames_completed, 5);

    ctrl.shutdown().unwrap();
}

#[test]
fn high_confidence_detections_match_any_template() {
    let mut ctrl = session("stub://kitchen");
    let keys = visionseek::Template::new("keys", "", "", PNG_MAGIC).unwrap();
    ctrl.set_template(Some(keys)).unwrap();
    ctrl.start().unwrap();

    // Placeholder labels never contain "keys", so only the threshold rule fires.
    for report in tick_until_frames(&mut ctrl, 20) {
        let expected = report.detections.iter().position(|d| d.confidence > 0.9);
        assert_eq!(report.target.map(|t| t.index), expected);
        for (i, detection) in report.detections.iter().enumerate() {
            assert_eq!(detection.is_target_match, Some(i) == expected);
        }
    }
}

#[test]
fn disabled_threshold_rule_never_matches_unrelated_labels() {
    let mut ctrl = SessionController::new(
        synthetic("stub://kitchen"),
        RandomDetector::seeded(3),
        MatchPolicy::default().without_high_confidence(),
        LoopSettings::default(),
    );
    let keys = visionseek::Template::new("keys", "", "", PNG_MAGIC).unwrap();
    ctrl.set_template(Some(keys)).unwrap();
    ctrl.start().unwrap();

    for report in tick_until_frames(&mut ctrl, 10) {
        assert!(report.target.is_none());
    }
}

#[test]
fn stop_and_restart_reacquires_the_camera() {
    let mut ctrl = session("stub://kitchen").with_facing_mode(FacingMode::Front);
    ctrl.start().unwrap();
    tick_until_frames(&mut ctrl, 1);

    ctrl.stop();
    assert!(!ctrl.is_active());
    assert!(!ctrl.has_stream());

    ctrl.start().unwrap();
    assert!(ctrl.is_active());
    assert_eq!(ctrl.stream_facing_mode(), Some(FacingMode::Front));
    assert_eq!(ctrl.facing_mode(), FacingMode::Front);
    tick_until_frames(&mut ctrl, 1);
}

#[test]
fn busy_camera_is_reported_to_the_user() {
    let transcript = Transcript::default();
    let mut app = App::new(
        session("stub://busy"),
        TemplateGallery::new(Box::new(MemoryTemplateStore::new())),
        Box::new(transcript.clone()),
    );

    let err = app.start().unwrap_err();
    assert_eq!(err, SessionError::Camera(CameraError::Busy));
    let lines = transcript.lines();
    assert!(lines
        .iter()
        .any(|l| l.starts_with("danger: The camera is in use")));
    assert!(lines.iter().any(|l| l.starts_with("say: The camera is in use")));
}

#[test]
fn voice_driven_search_flow() {
    let transcript = Transcript::default();
    let mut app = App::new(
        session("stub://kitchen"),
        TemplateGallery::new(Box::new(MemoryTemplateStore::new())),
        Box::new(transcript.clone()),
    );
    app.upload_template("Water Bottle", "drink", "blue", PNG_MAGIC)
        .unwrap();

    app.handle_utterance("寻找水瓶");
    assert!(!app.session().is_active());
    assert!(transcript.lines().iter().any(|l| l.contains("No template for 水瓶")));

    app.handle_utterance("Find water bottle!");
    assert!(app.session().is_active());

    app.handle_utterance("switch camera");
    assert_eq!(app.session().facing_mode(), FacingMode::Front);

    app.handle_utterance("sing a song");
    assert!(transcript
        .lines()
        .iter()
        .any(|l| l.starts_with("say: Command not recognized")));

    app.shutdown().unwrap();
}

#[test]
fn deleting_on_a_full_store_warns_about_dropped_templates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("templates.db");
    let path = path.to_str().unwrap();

    let templates: Vec<_> = (0..6)
        .map(|i| Template::new(&format!("t{i}"), "", "", PNG_MAGIC).unwrap())
        .collect();
    let per_template = serde_json::to_string(&templates[..1]).unwrap().len();
    SqliteTemplateStore::open(path)
        .unwrap()
        .save(&templates)
        .unwrap();

    // The saved list no longer fits once the quota shrinks to four entries.
    let store = SqliteTemplateStore::open(path)
        .unwrap()
        .with_quota(Some(per_template * 4 + per_template / 2));
    let transcript = Transcript::default();
    let mut app = App::new(
        session("stub://kitchen"),
        TemplateGallery::new(Box::new(store)),
        Box::new(transcript.clone()),
    );
    assert_eq!(app.load_templates(), 6);
    assert_eq!(app.session().current_template().unwrap().name, "t5");

    let removed = app.delete_template(&templates[5].id).unwrap().unwrap();
    assert_eq!(removed.name, "t5");

    let kept: Vec<_> = app.gallery().list().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(kept, ["t2", "t3", "t4"]);
    assert_eq!(app.session().current_template().unwrap().name, "t2");
    let lines = transcript.lines();
    assert!(lines
        .iter()
        .any(|l| l.starts_with("warning: Storage is full") && l.contains("t0, t1")));
    assert!(lines.iter().any(|l| l == "info: Template deleted"));
}
