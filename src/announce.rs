//! User feedback: speech output and on-screen notices.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Danger,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Danger => "danger",
        };
        f.write_str(name)
    }
}

/// Sink for everything the app says to the user.
///
/// `speak` interrupts whatever is currently being spoken.
pub trait Announcer: Send {
    fn speak(&mut self, text: &str);

    fn notice(&mut self, level: NoticeLevel, message: &str);
}

/// Announcer that writes speech and notices to the log.
#[derive(Debug, Default)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn speak(&mut self, text: &str) {
        log::info!("say: {}", text);
    }

    fn notice(&mut self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Danger => log::error!("[{}] {}", level, message),
            NoticeLevel::Warning => log::warn!("[{}] {}", level, message),
            NoticeLevel::Success | NoticeLevel::Info => log::info!("[{}] {}", level, message),
        }
    }
}
