//! Decision scoring
//!
//! Maps summarized AU and meta evidence through configured per-code weights
//! and combo rules into clamped per-dimension scores, then reports the
//! dominant dimension with its recommended action and questions.

use crate::error::ComputeError;
use crate::types::{ActionUnits, ExpressionResult, GazeStatus, MetaSignals, OrderedMap};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const SCORE_LIMIT: f64 = 100.0;

/// Gaze directed down
pub const GAZE_DOWN_CODE: &str = "GAZE64";
/// Head tilted up (negative pitch)
pub const HEAD_UP_CODE: &str = "HEAD53";
/// Head tilted down (positive pitch)
pub const HEAD_DOWN_CODE: &str = "HEAD54";
/// Pitch (degrees) beyond which a head code activates
pub const HEAD_PITCH_THRESHOLD: f64 = 15.0;

const FALLBACK_ACTION: &str = "Analyze";

/// Dimension descriptor; only the key order matters for scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboRule {
    #[serde(default)]
    pub id: String,
    pub requires: Vec<String>,
    #[serde(default)]
    pub forbids: Vec<String>,
    #[serde(default)]
    pub adjustments: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub tag: Vec<String>,
}

impl ComboRule {
    /// First tag, falling back to the id
    pub fn label(&self) -> &str {
        self.tag.first().map(String::as_str).unwrap_or(&self.id)
    }

    pub fn fires(&self, active: &BTreeSet<String>) -> bool {
        self.requires.iter().all(|code| active.contains(code))
            && !self.forbids.iter().any(|code| active.contains(code))
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(tag) => vec![tag],
        OneOrMany::Many(tags) => tags,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionQuestions {
    pub action: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Scoring rule set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacsConfig {
    pub dimensions: OrderedMap<DimensionInfo>,
    pub weights_by_code: BTreeMap<String, BTreeMap<String, f64>>,
    pub combo_rules: Vec<ComboRule>,
    #[serde(default)]
    pub default_actions_questions: BTreeMap<String, ActionQuestions>,
}

impl FacsConfig {
    /// Bundled conversational decision rules
    pub fn bundled() -> Result<Self, ComputeError> {
        Self::from_json(include_str!("../config/facs_decision.json"))
    }

    /// Parse and validate a rule set
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ComputeError> {
        for field in ["weights_by_code", "combo_rules", "dimensions"] {
            if value.get(field).map_or(true, |v| v.is_null()) {
                return Err(ComputeError::MissingField(format!("facs.{field}")));
            }
        }
        let config: FacsConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Every referenced dimension must be declared
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.dimensions.is_empty() {
            return Err(ComputeError::InvalidConfig(
                "facs.dimensions must not be empty".to_string(),
            ));
        }

        for (code, weights) in &self.weights_by_code {
            if let Some(dim) = weights.keys().find(|d| !self.dimensions.contains_key(d)) {
                return Err(ComputeError::InvalidConfig(format!(
                    "weight for {code} references undeclared dimension {dim}"
                )));
            }
        }

        for rule in &self.combo_rules {
            if let Some(dim) = rule.adjustments.keys().find(|d| !self.dimensions.contains_key(d)) {
                return Err(ComputeError::InvalidConfig(format!(
                    "combo rule {} references undeclared dimension {dim}",
                    rule.label()
                )));
            }
        }

        Ok(())
    }
}

/// Quantize an AU intensity into one of five FACS intensity multipliers (A-E)
pub fn intensity_multiplier(value: f64) -> f64 {
    if value >= 0.8 {
        1.0
    } else if value >= 0.6 {
        0.8
    } else if value >= 0.4 {
        0.6
    } else if value >= 0.2 {
        0.4
    } else if value >= 0.1 {
        0.2
    } else {
        0.0
    }
}

pub fn clamp_score(value: f64) -> f64 {
    value.clamp(-SCORE_LIMIT, SCORE_LIMIT)
}

/// Synthetic codes derived from meta signals
pub fn meta_codes(meta: &MetaSignals) -> Vec<&'static str> {
    let mut codes = Vec::new();
    if meta.gaze == GazeStatus::ThinkingDown {
        codes.push(GAZE_DOWN_CODE);
    }
    if meta.head_pitch > HEAD_PITCH_THRESHOLD {
        codes.push(HEAD_DOWN_CODE);
    } else if meta.head_pitch < -HEAD_PITCH_THRESHOLD {
        codes.push(HEAD_UP_CODE);
    }
    codes
}

#[derive(Debug, Clone)]
pub struct DecisionScorer {
    config: FacsConfig,
}

impl DecisionScorer {
    pub fn new(config: FacsConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FacsConfig {
        &self.config
    }

    pub fn score(&self, aus: &ActionUnits, meta: &MetaSignals) -> ExpressionResult {
        let mut scores: OrderedMap<f64> = self
            .config
            .dimensions
            .keys()
            .map(|dim| (dim.to_string(), 0.0))
            .collect();
        let mut active = BTreeSet::new();

        for (code, value) in aus {
            let multiplier = intensity_multiplier(*value);
            if multiplier > 0.0 {
                if let Some(weights) = self.config.weights_by_code.get(code) {
                    apply(&mut scores, weights, multiplier);
                    active.insert(code.clone());
                }
            }
        }

        for code in meta_codes(meta) {
            if let Some(weights) = self.config.weights_by_code.get(code) {
                apply(&mut scores, weights, 1.0);
                active.insert(code.to_string());
            }
        }

        let mut active_combos = Vec::new();
        for rule in &self.config.combo_rules {
            if rule.fires(&active) {
                apply(&mut scores, &rule.adjustments, 1.0);
                active_combos.push(rule.label().to_string());
            }
        }

        for score in scores.values_mut() {
            *score = clamp_score(*score);
        }

        let (dominant_dimension, dominant_score) = dominant(&scores);
        let (action, questions) = match self.config.default_actions_questions.get(&dominant_dimension) {
            Some(aq) => (aq.action.clone(), aq.questions.clone()),
            None => (FALLBACK_ACTION.to_string(), Vec::new()),
        };

        ExpressionResult {
            dominant_dimension,
            dominant_value: round_half_up(dominant_score),
            active_combos,
            scores,
            recommended_actions: vec![action],
            questions,
        }
    }
}

fn apply(scores: &mut OrderedMap<f64>, weights: &BTreeMap<String, f64>, multiplier: f64) {
    for (dim, weight) in weights {
        if let Some(score) = scores.get_mut(dim) {
            *score += multiplier * weight;
        }
    }
}

/// Nearest integer with halves rounded toward +inf (-12.5 → -12)
fn round_half_up(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

/// Largest absolute score; earlier dimensions win ties
fn dominant(scores: &OrderedMap<f64>) -> (String, f64) {
    let mut best: Option<(&str, f64)> = None;
    for (dim, score) in scores.iter() {
        match best {
            Some((_, current)) if score.abs() <= current.abs() => {}
            _ => best = Some((dim, *score)),
        }
    }
    best.map(|(dim, score)| (dim.to_string(), score))
        .unwrap_or_default()
}
