use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::{CameraSettings, FacingMode};
use crate::gallery::{DEFAULT_DEGRADED_KEEP, DEFAULT_MAX_TEMPLATES};
use crate::matching::{MatchPolicy, DEFAULT_HIGH_CONFIDENCE, DEFAULT_SYNONYMS};
use crate::session::{frame_interval, LoopSettings, DEFAULT_ERROR_BACKOFF, DEFAULT_TARGET_FPS};

const DEFAULT_DB_PATH: &str = "visionseek.db";
const DEFAULT_CANVAS_WIDTH: u32 = 640;
const DEFAULT_CANVAS_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct VisionSeekConfigFile {
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    #[serde(rename = "loop")]
    loop_: Option<LoopConfigFile>,
    canvas: Option<CanvasConfigFile>,
    #[serde(rename = "match")]
    match_: Option<MatchConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    front_device: Option<String>,
    back_device: Option<String>,
    facing: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    target_fps: Option<u32>,
    error_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CanvasConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchConfigFile {
    /// A number, or `false` to disable the rule.
    high_confidence: Option<serde_json::Value>,
    synonyms: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    max_templates: Option<usize>,
    degraded_keep: Option<usize>,
    quota_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct VisionSeekConfig {
    pub db_path: String,
    pub camera: CameraSettings,
    pub facing: FacingMode,
    pub target_fps: u32,
    pub error_backoff: Duration,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub matching: MatchSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// `None` disables the high-confidence rule.
    pub high_confidence: Option<f32>,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub max_templates: usize,
    pub degraded_keep: usize,
    pub quota_bytes: Option<usize>,
}

impl VisionSeekConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISIONSEEK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VisionSeekConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let camera_file = file.camera.unwrap_or_default();
        let defaults = CameraSettings::default();
        let facing = match camera_file.facing.as_deref() {
            Some(facing) => facing.parse()?,
            None => FacingMode::default(),
        };
        let camera = CameraSettings {
            url: camera_file.url.unwrap_or(defaults.url),
            front_device: camera_file.front_device.unwrap_or(defaults.front_device),
            back_device: camera_file.back_device.unwrap_or(defaults.back_device),
            width: camera_file.width.unwrap_or(defaults.width),
            height: camera_file.height.unwrap_or(defaults.height),
        };

        let loop_file = file.loop_.unwrap_or_default();
        let canvas_file = file.canvas.unwrap_or_default();

        let match_file = file.match_.unwrap_or_default();
        let high_confidence = match match_file.high_confidence {
            None => Some(DEFAULT_HIGH_CONFIDENCE),
            Some(value) => parse_high_confidence_value(&value)?,
        };
        let matching = MatchSettings {
            high_confidence,
            synonyms: match_file
                .synonyms
                .unwrap_or_else(|| DEFAULT_SYNONYMS.iter().map(|s| s.to_string()).collect()),
        };

        let store_file = file.store.unwrap_or_default();
        let store = StoreSettings {
            max_templates: store_file.max_templates.unwrap_or(DEFAULT_MAX_TEMPLATES),
            degraded_keep: store_file.degraded_keep.unwrap_or(DEFAULT_DEGRADED_KEEP),
            quota_bytes: store_file.quota_bytes,
        };

        Ok(Self {
            db_path,
            camera,
            facing,
            target_fps: loop_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            error_backoff: loop_file
                .error_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ERROR_BACKOFF),
            canvas_width: canvas_file.width.unwrap_or(DEFAULT_CANVAS_WIDTH),
            canvas_height: canvas_file.height.unwrap_or(DEFAULT_CANVAS_HEIGHT),
            matching,
            store,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("VISIONSEEK_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("VISIONSEEK_CAMERA") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(facing) = std::env::var("VISIONSEEK_FACING") {
            if !facing.trim().is_empty() {
                self.facing = facing.parse()?;
            }
        }
        if let Ok(fps) = std::env::var("VISIONSEEK_TARGET_FPS") {
            self.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("VISIONSEEK_TARGET_FPS must be an integer"))?;
        }
        if let Ok(threshold) = std::env::var("VISIONSEEK_HIGH_CONFIDENCE") {
            self.matching.high_confidence = parse_high_confidence_env(&threshold)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.target_fps == 0 || self.target_fps > 120 {
            return Err(anyhow!("loop.target_fps must be between 1 and 120"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(anyhow!("canvas width and height must be greater than zero"));
        }
        if let Some(threshold) = self.matching.high_confidence {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow!("match.high_confidence must be within [0, 1]"));
            }
        }
        if self.store.max_templates == 0 {
            return Err(anyhow!("store.max_templates must be greater than zero"));
        }
        if self.store.degraded_keep == 0 || self.store.degraded_keep > self.store.max_templates {
            return Err(anyhow!(
                "store.degraded_keep must be between 1 and store.max_templates"
            ));
        }
        self.matching.synonyms = self
            .matching
            .synonyms
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            min_frame_interval: frame_interval(self.target_fps),
            error_backoff: self.error_backoff,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy::new(self.matching.synonyms.clone(), self.matching.high_confidence)
    }
}

fn parse_high_confidence_value(value: &serde_json::Value) -> Result<Option<f32>> {
    match value {
        serde_json::Value::Bool(false) | serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(|v| Some(v as f32))
            .ok_or_else(|| anyhow!("match.high_confidence must be a number")),
        serde_json::Value::String(s) => parse_high_confidence_env(s),
        _ => Err(anyhow!("match.high_confidence must be a number or false")),
    }
}

fn parse_high_confidence_env(value: &str) -> Result<Option<f32>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("off") || value.eq_ignore_ascii_case("false") {
        return Ok(None);
    }
    let threshold: f32 = value
        .parse()
        .map_err(|_| anyhow!("VISIONSEEK_HIGH_CONFIDENCE must be a number or 'off'"))?;
    Ok(Some(threshold))
}

fn read_config_file(path: &Path) -> Result<VisionSeekConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<VisionSeekConfig> {
        let file: VisionSeekConfigFile = serde_json::from_str(json)?;
        let mut cfg = VisionSeekConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.camera.url, "stub://camera");
        assert_eq!(cfg.facing, FacingMode::Back);
        assert_eq!(cfg.target_fps, 15);
        assert_eq!(cfg.matching.high_confidence, Some(0.9));
        assert_eq!(cfg.store.max_templates, 10);
        assert_eq!(cfg.store.degraded_keep, 3);
        assert!(cfg.store.quota_bytes.is_none());
    }

    #[test]
    fn high_confidence_can_be_disabled_in_file() {
        let cfg = parse(r#"{"match": {"high_confidence": false}}"#).unwrap();
        assert!(cfg.matching.high_confidence.is_none());
        assert!(cfg.match_policy().high_confidence().is_none());

        let cfg = parse(r#"{"match": {"high_confidence": 0.75}}"#).unwrap();
        assert_eq!(cfg.matching.high_confidence, Some(0.75));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse(r#"{"loop": {"target_fps": 0}}"#).is_err());
        assert!(parse(r#"{"match": {"high_confidence": 1.5}}"#).is_err());
        assert!(parse(r#"{"store": {"max_templates": 2, "degraded_keep": 3}}"#).is_err());
        assert!(parse(r#"{"camera": {"facing": "sideways"}}"#).is_err());
    }

    #[test]
    fn env_threshold_parsing() {
        assert_eq!(parse_high_confidence_env("off").unwrap(), None);
        assert_eq!(parse_high_confidence_env(" 0.8 ").unwrap(), Some(0.8));
        assert!(parse_high_confidence_env("high").is_err());
    }
}
