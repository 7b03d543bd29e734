//! Physical validation
//!
//! Per-AU geometric plausibility checks. Each divergence rule compares the
//! current spread of a landmark cluster against the spread observed on the
//! first frame for that AU, and penalizes AU values that disagree with it.

use crate::error::ComputeError;
use crate::geometry;
use crate::types::{ActionUnits, LandmarkPoint, OrderedMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thresholds that must both be exceeded before a penalty applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceConditions {
    pub au_threshold: f64,
    pub divergence_delta_threshold: f64,
}

/// What to do with an implausible AU value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValidationAction {
    /// Multiply the AU by `multiplier` (< 1)
    Penalize { multiplier: f64 },
}

/// A physical validation rule for one AU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PhysicalValidation {
    #[serde(rename_all = "camelCase")]
    Divergence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        landmark_indices: Vec<usize>,
        conditions: DivergenceConditions,
        action: ValidationAction,
    },
}

/// Ordered set of validations keyed by AU code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub validations: OrderedMap<PhysicalValidation>,
}

impl ValidationConfig {
    /// Bundled default rule set
    pub fn bundled() -> Result<Self, ComputeError> {
        Self::from_json(include_str!("../config/physical_validations.json"))
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        for (au, validation) in self.validations.iter() {
            let PhysicalValidation::Divergence {
                landmark_indices,
                action: ValidationAction::Penalize { multiplier },
                ..
            } = validation;

            if landmark_indices.is_empty() {
                return Err(ComputeError::InvalidConfig(format!(
                    "validation for {au} has no landmark indices"
                )));
            }
            if !(0.0..1.0).contains(multiplier) {
                return Err(ComputeError::InvalidConfig(format!(
                    "penalty multiplier for {au} must be in [0, 1), got {multiplier}"
                )));
            }
        }
        Ok(())
    }
}

/// Calibration state for one validated AU
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationState {
    pub baseline_divergence: Option<f64>,
    pub calibrated: bool,
}

/// Applies configured validations, owning the per-AU baselines
#[derive(Debug, Clone)]
pub struct PhysicalValidator {
    config: ValidationConfig,
    states: HashMap<String, ValidationState>,
}

impl PhysicalValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Return a validated copy of `aus`.
    ///
    /// The first frame seen for an AU only records its baseline divergence.
    pub fn apply(
        &mut self,
        aus: &ActionUnits,
        landmarks: &[LandmarkPoint],
        width: f64,
        height: f64,
    ) -> ActionUnits {
        let mut result = aus.clone();

        for (au, validation) in self.config.validations.iter() {
            let PhysicalValidation::Divergence {
                landmark_indices,
                conditions,
                action,
                ..
            } = validation;

            let current = geometry::divergence(landmarks, landmark_indices, width, height);
            let state = self.states.entry(au.to_string()).or_default();

            let Some(baseline) = state.baseline_divergence.filter(|_| state.calibrated) else {
                state.baseline_divergence = Some(current);
                state.calibrated = true;
                continue;
            };

            let delta = current - baseline;
            let value = result.get(au).copied().unwrap_or(0.0);

            if value > conditions.au_threshold && delta > conditions.divergence_delta_threshold {
                match action {
                    ValidationAction::Penalize { multiplier } => {
                        result.insert(au.to_string(), value * multiplier);
                    }
                }
            }
        }

        result
    }

    pub fn state(&self, au: &str) -> Option<&ValidationState> {
        self.states.get(au)
    }

    /// Forget every baseline; the next frame re-calibrates
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: f64 = 1000.0;
    const H: f64 = 1000.0;

    fn config() -> ValidationConfig {
        ValidationConfig::from_json(
            r#"{"validations": {"AU4": {
                "type": "divergence",
                "landmarkIndices": [0, 1],
                "conditions": {"auThreshold": 0.15, "divergenceDeltaThreshold": 6.0},
                "action": {"type": "penalize", "multiplier": 0.2}
            }}}"#,
        )
        .unwrap()
    }

    /// Two points `spread` pixels apart horizontally; divergence = spread / 2
    fn landmarks(spread: f64) -> Vec<LandmarkPoint> {
        vec![
            LandmarkPoint::new(0.5, 0.5, 0.0),
            LandmarkPoint::new(0.5 + spread / W, 0.5, 0.0),
        ]
    }

    fn aus(value: f64) -> ActionUnits {
        let mut aus = ActionUnits::new();
        aus.insert("AU4".to_string(), value);
        aus
    }

    #[test]
    fn test_first_frame_sets_baseline_without_modifying() {
        let mut validator = PhysicalValidator::new(config());
        // Even a wildly divergent first frame is left untouched
        let out = validator.apply(&aus(0.9), &landmarks(200.0), W, H);
        assert_eq!(out["AU4"], 0.9);

        let state = validator.state("AU4").unwrap();
        assert!(state.calibrated);
        assert!((state.baseline_divergence.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_applies_when_both_thresholds_exceeded() {
        let mut validator = PhysicalValidator::new(config());
        validator.apply(&aus(0.0), &landmarks(10.0), W, H);

        // Divergence 5 -> 20: delta 15 > 6
        let out = validator.apply(&aus(0.5), &landmarks(40.0), W, H);
        assert!((out["AU4"] - 0.5 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_no_penalty_below_au_threshold() {
        let mut validator = PhysicalValidator::new(config());
        validator.apply(&aus(0.0), &landmarks(10.0), W, H);
        let out = validator.apply(&aus(0.1), &landmarks(40.0), W, H);
        assert_eq!(out["AU4"], 0.1);
    }

    #[test]
    fn test_no_penalty_below_divergence_delta() {
        let mut validator = PhysicalValidator::new(config());
        validator.apply(&aus(0.0), &landmarks(10.0), W, H);
        // Divergence 5 -> 8: delta 3
        let out = validator.apply(&aus(0.8), &landmarks(16.0), W, H);
        assert_eq!(out["AU4"], 0.8);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let mut validator = PhysicalValidator::new(config());
        validator.apply(&aus(0.0), &landmarks(10.0), W, H);
        let input = aus(0.5);
        let _ = validator.apply(&input, &landmarks(40.0), W, H);
        assert_eq!(input["AU4"], 0.5);
    }

    #[test]
    fn test_reset_recalibrates() {
        let mut validator = PhysicalValidator::new(config());
        validator.apply(&aus(0.0), &landmarks(10.0), W, H);
        validator.reset();
        assert!(validator.state("AU4").is_none());

        // New baseline frame: untouched
        let out = validator.apply(&aus(0.5), &landmarks(40.0), W, H);
        assert_eq!(out["AU4"], 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let cfg = ValidationConfig::from_json(
            r#"{"validations": {"AU4": {
                "type": "divergence",
                "landmarkIndices": [1],
                "conditions": {"auThreshold": 0.1, "divergenceDeltaThreshold": 1.0},
                "action": {"type": "penalize", "multiplier": 1.5}
            }}}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
        assert!(ValidationConfig::bundled().unwrap().validate().is_ok());
    }
}
