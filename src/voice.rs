//! Voice command parsing.
//!
//! Utterances come from a speech recognizer (or stdin in the CLI). They are
//! lowercased and stripped of punctuation, then matched against the command
//! phrases in a fixed order; the first phrase found anywhere in the utterance
//! wins.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceCommand {
    StartDetection,
    /// Look up a template by name and search for it.
    Find(String),
    SwitchCamera,
    Capture,
    ReadResults,
    Unknown,
}

/// Spoken when an utterance matches no command.
pub const UNKNOWN_COMMAND_HINT: &str =
    "Command not recognized. Try \"start detection\" or \"find\" followed by an item.";

const START_PHRASES: [&str; 3] = ["开始检测", "start detection", "start detecting"];
const SWITCH_PHRASES: [&str; 2] = ["切换摄像头", "switch camera"];
const CAPTURE_PHRASES: [&str; 4] = ["拍照", "截图", "take photo", "capture"];
const READ_PHRASES: [&str; 3] = ["朗读结果", "读出结果", "read results"];

fn find_pattern() -> &'static Regex {
    static FIND_RE: OnceLock<Regex> = OnceLock::new();
    FIND_RE.get_or_init(|| Regex::new(r"(?:寻找|find|look for)\s*(.+)").unwrap())
}

/// Lowercase, drop punctuation and collapse whitespace.
pub fn normalize(utterance: &str) -> String {
    let stripped: String = utterance
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_punctuation() || is_cjk_punctuation(c) {
                ' '
            } else {
                c
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cjk_punctuation(c: char) -> bool {
    matches!(
        c,
        '，' | '。' | '！' | '？' | '、' | '；' | '：' | '“' | '”' | '（' | '）' | '《' | '》'
    )
}

impl VoiceCommand {
    pub fn parse(utterance: &str) -> Self {
        let text = normalize(utterance);
        if text.is_empty() {
            return VoiceCommand::Unknown;
        }
        if contains_any(&text, &START_PHRASES) {
            return VoiceCommand::StartDetection;
        }
        if let Some(caps) = find_pattern().captures(&text) {
            let item = caps[1].trim();
            if !item.is_empty() {
                return VoiceCommand::Find(item.to_string());
            }
        }
        if contains_any(&text, &SWITCH_PHRASES) {
            return VoiceCommand::SwitchCamera;
        }
        if contains_any(&text, &CAPTURE_PHRASES) {
            return VoiceCommand::Capture;
        }
        if contains_any(&text, &READ_PHRASES) {
            return VoiceCommand::ReadResults;
        }
        VoiceCommand::Unknown
    }

    /// Switch camera, capture and read results act on a running session.
    pub fn needs_session(&self) -> bool {
        matches!(
            self,
            VoiceCommand::SwitchCamera | VoiceCommand::Capture | VoiceCommand::ReadResults
        )
    }
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase))
}
