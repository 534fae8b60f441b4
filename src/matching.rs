//! Target matching between detector output and the current template.
//!
//! Rules are tried in priority order for each detection, detections in the order
//! the detector reported them. The first detection satisfying any rule is the
//! target; evaluation stops there.

use crate::detect::Detection;

/// Default confidence above which any label counts as the target.
pub const DEFAULT_HIGH_CONFIDENCE: f32 = 0.9;

/// Bottle-related terms treated as one object family.
pub const DEFAULT_SYNONYMS: [&str; 8] = [
    "bottle",
    "water bottle",
    "cup",
    "flask",
    "水杯",
    "水瓶",
    "瓶子",
    "杯子",
];

/// Which rule flagged the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchRule {
    ExactLabel,
    NameContainsLabel,
    LabelContainsName,
    Synonym,
    HighConfidence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetMatch {
    /// Index into the frame's detections.
    pub index: usize,
    pub rule: MatchRule,
}

#[derive(Clone, Debug)]
pub struct MatchPolicy {
    synonyms: Vec<String>,
    /// `None` disables the high-confidence rule.
    high_confidence: Option<f32>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            synonyms: DEFAULT_SYNONYMS.iter().map(|s| s.to_string()).collect(),
            high_confidence: Some(DEFAULT_HIGH_CONFIDENCE),
        }
    }
}

impl MatchPolicy {
    pub fn new(synonyms: Vec<String>, high_confidence: Option<f32>) -> Self {
        Self {
            synonyms: synonyms
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            high_confidence,
        }
    }

    pub fn high_confidence(&self) -> Option<f32> {
        self.high_confidence
    }

    pub fn without_high_confidence(mut self) -> Self {
        self.high_confidence = None;
        self
    }

    /// Rule that makes `detection` the target for `template_name`, if any.
    pub fn rule_for(&self, template_name: &str, detection: &Detection) -> Option<MatchRule> {
        let name = template_name.trim().to_lowercase();
        let label = detection.label.trim().to_lowercase();

        if !label.is_empty() && !name.is_empty() {
            if label == name {
                return Some(MatchRule::ExactLabel);
            }
            if name.contains(&label) {
                return Some(MatchRule::NameContainsLabel);
            }
            if label.contains(&name) {
                return Some(MatchRule::LabelContainsName);
            }
            if self.in_synonym_set(&label) && self.in_synonym_set(&name) {
                return Some(MatchRule::Synonym);
            }
        }

        match self.high_confidence {
            Some(threshold) if detection.confidence > threshold => Some(MatchRule::HighConfidence),
            _ => None,
        }
    }

    /// Flag the first matching detection and clear every other flag.
    pub fn apply(&self, template_name: &str, detections: &mut [Detection]) -> Option<TargetMatch> {
        let mut found = None;
        for (index, detection) in detections.iter_mut().enumerate() {
            detection.is_target_match = false;
            if found.is_some() {
                continue;
            }
            if let Some(rule) = self.rule_for(template_name, detection) {
                detection.is_target_match = true;
                found = Some(TargetMatch { index, rule });
            }
        }
        found
    }

    fn in_synonym_set(&self, text: &str) -> bool {
        self.synonyms.iter().any(|term| text.contains(term.as_str()))
    }
}

/// Clear all target flags (no template selected).
pub fn clear_matches(detections: &mut [Detection]) {
    for detection in detections {
        detection.is_target_match = false;
    }
}
