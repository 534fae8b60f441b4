//! VisionSeek
//!
//! Camera-based search for user-registered objects. The user uploads photos of
//! items (templates); a detection session runs an object detector over live
//! camera frames and flags the detection that corresponds to the selected
//! template, with voice commands and spoken feedback for hands-free use.
//!
//! # Architecture
//!
//! - `session`: the detection session controller (camera lifecycle, frame loop,
//!   matching, canvas overlay)
//! - `camera`, `detect`, `storage`: collaborator traits and their bundled
//!   implementations (synthetic/V4L2 cameras, placeholder detector, memory and
//!   SQLite template stores)
//! - `matching`: the rule set deciding which detection is the target
//! - `gallery`: the user's templates with capacity limits and degrade-on-full saves
//! - `voice`, `announce`, `app`: command parsing, user feedback and the glue
//!   between them
//!
//! The session loop is synchronous: the host calls `tick` once per display
//! frame and detection runs on a dedicated worker thread.

pub mod announce;
pub mod app;
pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod gallery;
pub mod matching;
pub mod render;
pub mod session;
pub mod storage;
pub mod template;
pub mod voice;

pub use announce::{Announcer, LogAnnouncer, NoticeLevel};
pub use app::App;
pub use camera::{open_camera, CameraSettings, CameraSource, FacingMode, VideoStream};
pub use config::VisionSeekConfig;
pub use detect::{BoundingBox, Detection, Detector, RandomDetector};
pub use error::{CameraError, ModelLoadError, SessionError, StorageError};
pub use frame::Frame;
pub use gallery::{SaveReport, TemplateGallery};
pub use matching::{MatchPolicy, MatchRule, TargetMatch};
pub use session::{
    FrameReport, LoopSettings, SessionController, SessionState, StartOutcome, TickOutcome,
};
pub use storage::{MemoryTemplateStore, SqliteTemplateStore, TemplateStore};
pub use template::Template;
pub use voice::VoiceCommand;
