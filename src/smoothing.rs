//! Hybrid smoothing engine
//!
//! Turns blendshape scores into stable AU intensities:
//! rotation-compensated gain → AU mapping → physical validation → power-law
//! response → EMA smoothing → manual neutral offset → noise gate → clamp.

use crate::error::ComputeError;
use crate::geometry::{LEFT_EAR, NOSE_TIP, RIGHT_EAR};
use crate::mapping::{compute_aus, MappingConfig};
use crate::types::{ActionUnits, LandmarkPoint};
use crate::validator::{PhysicalValidator, ValidationConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Meshes shorter than this cannot provide the ear landmarks
const MIN_ROTATION_LANDMARKS: usize = 455;

/// Tuning of the smoothing stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Base gain applied after the response curve
    pub sensitivity: f64,
    /// Power-law exponent of the response curve
    pub response_exponent: f64,
    /// EMA weight of the current frame
    pub alpha: f64,
    /// Values below this become 0
    pub noise_gate: f64,
    /// Yaw deviation tolerated before any rotation penalty
    pub rotation_dead_zone: f64,
    /// Penalty growth per unit of deviation past the dead zone
    pub rotation_slope: f64,
    /// Fraction of gain removed at full rotation penalty
    pub rotation_gain_damping: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            sensitivity: 2.8,
            response_exponent: 0.75,
            alpha: 0.6,
            noise_gate: 0.04,
            rotation_dead_zone: 0.12,
            rotation_slope: 6.0,
            rotation_gain_damping: 0.8,
        }
    }
}

impl SmoothingConfig {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ComputeError::InvalidConfig(format!(
                "smoothing alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if self.sensitivity <= 0.0 || self.response_exponent <= 0.0 {
            return Err(ComputeError::InvalidConfig(
                "sensitivity and response exponent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Manual neutral-face calibration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub offsets: ActionUnits,
    pub calibrated: bool,
}

/// Output of one smoothing pass
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedFrame {
    pub aus: ActionUnits,
    pub rot_penalty: f64,
}

/// Head-rotation penalty in [0, 1] from nose position between the ears.
///
/// Returns 1.0 (maximal penalty) when the landmarks needed are missing.
pub fn rotation_penalty(landmarks: &[LandmarkPoint], config: &SmoothingConfig) -> f64 {
    if landmarks.len() < MIN_ROTATION_LANDMARKS {
        return 1.0;
    }

    let (Some(nose), Some(left), Some(right)) = (
        landmarks.get(NOSE_TIP),
        landmarks.get(LEFT_EAR),
        landmarks.get(RIGHT_EAR),
    ) else {
        return 1.0;
    };

    let face_width = (right.x - left.x).abs();
    if face_width == 0.0 {
        return 1.0;
    }

    let ratio = (nose.x - left.x).abs() / face_width;
    let deviation = (ratio - 0.5).abs();

    if deviation > config.rotation_dead_zone {
        ((deviation - config.rotation_dead_zone) * config.rotation_slope).min(1.0)
    } else {
        0.0
    }
}

/// Smoothing engine owning EMA history, validator state and calibration
#[derive(Debug, Clone)]
pub struct HybridEngine {
    config: SmoothingConfig,
    mappings: MappingConfig,
    validator: PhysicalValidator,
    previous: HashMap<String, f64>,
    calibration: CalibrationState,
}

impl HybridEngine {
    pub fn new(
        config: SmoothingConfig,
        mappings: MappingConfig,
        validations: ValidationConfig,
    ) -> Self {
        Self {
            config,
            mappings,
            validator: PhysicalValidator::new(validations),
            previous: HashMap::new(),
            calibration: CalibrationState::default(),
        }
    }

    pub fn process(
        &mut self,
        scores: &HashMap<String, f64>,
        landmarks: &[LandmarkPoint],
        width: f64,
        height: f64,
    ) -> SmoothedFrame {
        let rot_penalty = rotation_penalty(landmarks, &self.config);
        let gain = self.config.sensitivity * (1.0 - rot_penalty * self.config.rotation_gain_damping);

        let raw = compute_aus(scores, &self.mappings);
        let validated = self.validator.apply(&raw, landmarks, width, height);

        let alpha = self.config.alpha;
        let mut aus = ActionUnits::new();

        for (code, raw_value) in validated {
            // Negative raw values would make the power curve NaN
            let curved = raw_value.max(0.0).powf(self.config.response_exponent) * gain;

            let prev = self.previous.get(&code).copied().unwrap_or(0.0);
            let smoothed = curved * alpha + prev * (1.0 - alpha);
            self.previous.insert(code.clone(), smoothed);

            let mut value = smoothed;
            if self.calibration.calibrated {
                let offset = self.calibration.offsets.get(&code).copied().unwrap_or(0.0);
                value = (value - offset).max(0.0);
            }

            if value < self.config.noise_gate {
                value = 0.0;
            }

            aus.insert(code, value.min(1.0));
        }

        SmoothedFrame { aus, rot_penalty }
    }

    /// Use `current` as the neutral face
    pub fn calibrate(&mut self, current: &ActionUnits) {
        info!(aus = current.len(), "neutral face calibrated");
        self.calibration = CalibrationState {
            offsets: current.clone(),
            calibrated: true,
        };
    }

    /// Drop the manual offsets; validation baselines are kept
    pub fn reset_calibration(&mut self) {
        info!("calibration reset");
        self.calibration = CalibrationState::default();
    }

    /// Forget physical-validation baselines; the next frame becomes the new baseline
    pub fn reset_validation(&mut self) {
        info!("validation baselines reset");
        self.validator.reset();
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn set_calibration(&mut self, calibration: CalibrationState) {
        self.calibration = calibration;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.calibrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LEFT_EAR, NOSE_TIP, RIGHT_EAR};
    use crate::types::{Blendshape, FaceObservation};

    fn frontal_landmarks() -> Vec<LandmarkPoint> {
        let mut landmarks = vec![LandmarkPoint::new(0.5, 0.5, 0.0); 478];
        landmarks[NOSE_TIP] = LandmarkPoint::new(0.5, 0.5, 0.0);
        landmarks[LEFT_EAR] = LandmarkPoint::new(0.3, 0.5, 0.0);
        landmarks[RIGHT_EAR] = LandmarkPoint::new(0.7, 0.5, 0.0);
        landmarks
    }

    fn au4_engine() -> HybridEngine {
        let mappings = MappingConfig::from_json(
            r#"{"mappings": {"AU4": {"type": "average", "blendshapes": ["browDownLeft", "browDownRight"]}}}"#,
        )
        .unwrap();
        HybridEngine::new(SmoothingConfig::default(), mappings, ValidationConfig::default())
    }

    fn brow(value: f64) -> HashMap<String, f64> {
        FaceObservation {
            landmarks: Vec::new(),
            blendshapes: vec![
                Blendshape::new("browDownLeft", value),
                Blendshape::new("browDownRight", value),
            ],
        }
        .blendshape_scores()
    }

    #[test]
    fn test_rotation_penalty_frontal_is_zero() {
        assert_eq!(rotation_penalty(&frontal_landmarks(), &SmoothingConfig::default()), 0.0);
    }

    #[test]
    fn test_rotation_penalty_turned_head() {
        let mut landmarks = frontal_landmarks();
        // ratio = 0.3 / 0.4 = 0.75, deviation 0.25
        landmarks[NOSE_TIP] = LandmarkPoint::new(0.6, 0.5, 0.0);
        let penalty = rotation_penalty(&landmarks, &SmoothingConfig::default());
        assert!((penalty - (0.25 - 0.12) * 6.0).abs() < 1e-9);

        landmarks[NOSE_TIP] = LandmarkPoint::new(0.7, 0.5, 0.0);
        assert_eq!(rotation_penalty(&landmarks, &SmoothingConfig::default()), 1.0);
    }

    #[test]
    fn test_rotation_penalty_fails_safe() {
        let short = vec![LandmarkPoint::default(); 100];
        assert_eq!(rotation_penalty(&short, &SmoothingConfig::default()), 1.0);

        let mut flat = frontal_landmarks();
        flat[LEFT_EAR] = flat[RIGHT_EAR];
        assert_eq!(rotation_penalty(&flat, &SmoothingConfig::default()), 1.0);
    }

    #[test]
    fn test_single_frame_response_curve() {
        let mut engine = au4_engine();
        let out = engine.process(&brow(0.1), &frontal_landmarks(), 1280.0, 720.0);
        assert_eq!(out.rot_penalty, 0.0);
        let expected = 0.1f64.powf(0.75) * 2.8 * 0.6;
        assert!((out.aus["AU4"] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_strong_first_frame_clamps_to_one() {
        let mut engine = au4_engine();
        let out = engine.process(&brow(0.9), &frontal_landmarks(), 1280.0, 720.0);
        // 0.9^0.75 * 2.8 * 0.6 ≈ 1.44 before the clamp
        assert!(0.9f64.powf(0.75) * 2.8 * 0.6 > 1.4);
        assert_eq!(out.aus["AU4"], 1.0);
    }

    #[test]
    fn test_ema_tracks_history() {
        let mut engine = au4_engine();
        let first = engine.process(&brow(0.05), &frontal_landmarks(), 1280.0, 720.0);
        let second = engine.process(&brow(0.05), &frontal_landmarks(), 1280.0, 720.0);

        let curved = 0.05f64.powf(0.75) * 2.8;
        let s1 = curved * 0.6;
        let s2 = curved * 0.6 + s1 * 0.4;
        assert!((first.aus["AU4"] - s1).abs() < 1e-12);
        assert!((second.aus["AU4"] - s2).abs() < 1e-12);
    }

    #[test]
    fn test_noise_gate_zeroes_small_values() {
        let mut engine = au4_engine();
        let out = engine.process(&brow(0.001), &frontal_landmarks(), 1280.0, 720.0);
        // 0.001^0.75 * 2.8 * 0.6 ≈ 0.0094
        assert_eq!(out.aus["AU4"], 0.0);
    }

    #[test]
    fn test_calibration_offset_subtracts_after_ema() {
        let inputs = [0.05, 0.1, 0.08];

        let mut reference = au4_engine();
        let baseline: Vec<f64> = inputs
            .iter()
            .map(|v| reference.process(&brow(*v), &frontal_landmarks(), 1280.0, 720.0).aus["AU4"])
            .collect();

        let mut engine = au4_engine();
        let mut offsets = ActionUnits::new();
        offsets.insert("AU4".to_string(), 0.1);
        engine.calibrate(&offsets);
        assert!(engine.is_calibrated());

        let calibrated: Vec<f64> = inputs
            .iter()
            .map(|v| engine.process(&brow(*v), &frontal_landmarks(), 1280.0, 720.0).aus["AU4"])
            .collect();
        for (obs, base) in calibrated.iter().zip(&baseline) {
            let expected = (base - 0.1).max(0.0);
            let expected = if expected < 0.04 { 0.0 } else { expected };
            assert!((obs - expected).abs() < 1e-12);
        }
    }

    fn bundled_au4_engine() -> HybridEngine {
        let mappings = MappingConfig::from_json(
            r#"{"mappings": {"AU4": {"type": "average", "blendshapes": ["browDownLeft", "browDownRight"]}}}"#,
        )
        .unwrap();
        HybridEngine::new(
            SmoothingConfig::default(),
            mappings,
            ValidationConfig::bundled().unwrap(),
        )
    }

    /// Brow cluster spread about 25 px apart on a 1280x720 frame
    fn widened_brows() -> Vec<LandmarkPoint> {
        let mut landmarks = frontal_landmarks();
        landmarks[107] = LandmarkPoint::new(0.45, 0.5, 0.0);
        landmarks[336] = LandmarkPoint::new(0.55, 0.5, 0.0);
        landmarks
    }

    #[test]
    fn test_reset_calibration_mid_stream_matches_uncalibrated_twin() {
        let mut twin = bundled_au4_engine();
        let mut engine = bundled_au4_engine();

        // Narrow cluster sets the divergence baseline on both
        let first = twin.process(&brow(0.5), &frontal_landmarks(), 1280.0, 720.0);
        let mirrored = engine.process(&brow(0.5), &frontal_landmarks(), 1280.0, 720.0);
        assert_eq!(first.aus, mirrored.aus);

        engine.calibrate(&mirrored.aus);
        engine.reset_calibration();
        assert!(!engine.is_calibrated());

        for _ in 0..3 {
            let expected = twin.process(&brow(0.5), &widened_brows(), 1280.0, 720.0);
            let observed = engine.process(&brow(0.5), &widened_brows(), 1280.0, 720.0);
            assert_eq!(observed.aus, expected.aus);
            assert!(observed.aus["AU4"] < 1.0);
        }
    }

    #[test]
    fn test_reset_validation_rebaselines_divergence() {
        let mut penalized = bundled_au4_engine();
        let mut rebaselined = bundled_au4_engine();
        penalized.process(&brow(0.5), &frontal_landmarks(), 1280.0, 720.0);
        rebaselined.process(&brow(0.5), &frontal_landmarks(), 1280.0, 720.0);

        rebaselined.reset_validation();

        // The widened frame becomes the new baseline, so nothing is penalized
        let kept = penalized.process(&brow(0.5), &widened_brows(), 1280.0, 720.0);
        let fresh = rebaselined.process(&brow(0.5), &widened_brows(), 1280.0, 720.0);
        assert!(kept.aus["AU4"] < 1.0);
        assert_eq!(fresh.aus["AU4"], 1.0);
    }

    #[test]
    fn test_rotation_reduces_gain() {
        let mut landmarks = frontal_landmarks();
        landmarks[NOSE_TIP] = LandmarkPoint::new(0.7, 0.5, 0.0);
        let mut engine = au4_engine();
        let out = engine.process(&brow(0.1), &landmarks, 1280.0, 720.0);
        assert_eq!(out.rot_penalty, 1.0);
        let expected = 0.1f64.powf(0.75) * 2.8 * (1.0 - 0.8) * 0.6;
        assert!((out.aus["AU4"] - expected).abs() < 1e-12);
    }
}
