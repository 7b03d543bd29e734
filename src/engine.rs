//! Engine orchestration
//!
//! This module provides the public frame-processing API. Per frame:
//! smoothing (mapping, validation, response curve) → periodic motion strain
//! → gaze and speech meta → window buffer → on window elapse, decision scoring.
//!
//! The engine is single-threaded and non-reentrant: process one frame to
//! completion before handing it the next.

use crate::attention::{head_pose, AttentionTracker};
use crate::config::EngineConfig;
use crate::conflict;
use crate::detector::FaceDetector;
use crate::error::ComputeError;
use crate::motion::{build_estimator, OpticalFlow, RegionStrain, StrainEstimator, StrainInput};
use crate::scoring::DecisionScorer;
use crate::smoothing::{CalibrationState, HybridEngine};
use crate::speech::SpeechDetector;
use crate::types::{ActionUnits, ExpressionResult, FaceObservation, FrameResult, MetaSignals, VideoFrame};
use crate::window::{BufferEntry, ExpressionTiming, WindowAggregator, WindowSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Peak intensity a timing classification needs
pub const DEFAULT_TIMING_THRESHOLD: f64 = 0.35;

const BROW_STRAIN_LIMIT: f64 = -3.0;
const BROW_AU_FLOOR: f64 = 0.45;
const NOSE_STRAIN_LIMIT: f64 = -2.5;
const NOSE_AU_FLOOR: f64 = 0.4;
const MOUTH_STRAIN_LIMIT: f64 = 4.0;
const MOUTH_AU_BOOST: f64 = 0.15;
const MOUTH_BOOSTED: [&str; 3] = ["AU12", "AU24", "AU25"];

/// A decision with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub engine_id: Uuid,
    /// Timestamp of the frame that closed the window
    pub computed_at: DateTime<Utc>,
    pub window_frames: usize,
    #[serde(flatten)]
    pub decision: ExpressionResult,
}

type ResultCallback = Box<dyn FnMut(&FrameResult)>;
type DecisionCallback = Box<dyn FnMut(&DecisionRecord)>;

/// Stateful expression engine
pub struct ExpressionEngine {
    id: Uuid,
    config: EngineConfig,
    detector: Option<Box<dyn FaceDetector>>,
    smoothing: HybridEngine,
    strain: Box<dyn StrainEstimator>,
    attention: AttentionTracker,
    speech: SpeechDetector,
    window: WindowAggregator,
    scorer: DecisionScorer,
    frame_index: u64,
    last_strain_frame: Option<u64>,
    current_decision: Option<DecisionRecord>,
    on_result: Option<ResultCallback>,
    on_decision: Option<DecisionCallback>,
}

impl ExpressionEngine {
    /// Create an engine using the configured strain strategy
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        let strain = build_estimator(config.strain.strategy, None)?;
        Self::with_strain_estimator(config, strain)
    }

    /// Create an engine backed by an optical flow primitive
    pub fn with_optical_flow(
        config: EngineConfig,
        flow: Box<dyn OpticalFlow>,
    ) -> Result<Self, ComputeError> {
        let strain = build_estimator(config.strain.strategy, Some(flow))?;
        Self::with_strain_estimator(config, strain)
    }

    /// Create an engine with a caller-supplied strain estimator
    pub fn with_strain_estimator(
        config: EngineConfig,
        strain: Box<dyn StrainEstimator>,
    ) -> Result<Self, ComputeError> {
        config.validate()?;

        let engine = Self {
            id: Uuid::new_v4(),
            smoothing: HybridEngine::new(
                config.smoothing.clone(),
                config.mappings.clone(),
                config.validations.clone(),
            ),
            strain,
            attention: AttentionTracker::new(config.thresholds.max_gaze_deviation),
            speech: SpeechDetector::new(config.thresholds.speaking_threshold),
            window: WindowAggregator::new(config.window_seconds, config.fps),
            scorer: DecisionScorer::new(config.facs.clone())?,
            detector: None,
            frame_index: 0,
            last_strain_frame: None,
            current_decision: None,
            on_result: None,
            on_decision: None,
            config,
        };

        info!(
            engine_id = %engine.id,
            window_capacity = engine.window.capacity(),
            strain = ?engine.config.strain.strategy,
            "expression engine ready"
        );
        Ok(engine)
    }

    /// Attach the detector used by [`Self::process_frame`]
    pub fn with_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Detect and process one frame; `None` when no face is found
    pub fn process_frame(&mut self, frame: &VideoFrame) -> Option<FrameResult> {
        let Some(detector) = self.detector.as_mut() else {
            warn!("process_frame called without a face detector");
            return None;
        };

        let observation = match detector.detect(frame) {
            Ok(Some(observation)) => observation,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "face detection failed");
                return None;
            }
        };

        self.process_detection(frame, &observation)
    }

    /// Process an already-detected face
    pub fn process_detection(
        &mut self,
        frame: &VideoFrame,
        face: &FaceObservation,
    ) -> Option<FrameResult> {
        if face.landmarks.is_empty() {
            return None;
        }

        let landmarks = face.landmarks.as_slice();
        let width = frame.width as f64;
        let height = frame.height as f64;

        let smoothed = self
            .smoothing
            .process(&face.blendshape_scores(), landmarks, width, height);
        let mut aus = smoothed.aus;
        let rot_penalty = smoothed.rot_penalty;

        let gaze = self.attention.analyze(landmarks);
        let is_speaking = self.speech.is_speaking(landmarks);

        if self.strain_due(rot_penalty) {
            self.last_strain_frame = Some(self.frame_index);
            match self.strain.analyze(&StrainInput { frame, landmarks }) {
                Ok(strain) => apply_strain(&mut aus, &strain),
                Err(e) => warn!(error = %e, "motion strain unavailable for this frame"),
            }
        }
        self.frame_index += 1;

        let (head_yaw, head_pitch) = head_pose(landmarks);
        let meta = MetaSignals {
            gaze: gaze.status,
            is_speaking,
            head_yaw,
            head_pitch,
        };

        let summary = self.window.push(BufferEntry {
            aus: aus.clone(),
            meta,
            timestamp: frame.timestamp,
        });
        if let Some(summary) = summary {
            self.decide(summary);
        }

        let result = FrameResult {
            aus,
            meta,
            rot_penalty,
            is_stable: self.window.is_stable(),
            current_decision: self.current_decision().cloned(),
        };

        notify(&mut self.on_result, &result, "result");
        Some(result)
    }

    fn strain_due(&self, rot_penalty: f64) -> bool {
        if rot_penalty >= self.config.strain.max_rotation_penalty {
            return false;
        }
        match self.last_strain_frame {
            None => true,
            Some(last) => self.frame_index - last >= self.config.strain.interval_frames as u64,
        }
    }

    fn decide(&mut self, summary: WindowSummary) {
        let aus = if self.config.context_suppression {
            conflict::suppress(&summary.aus, &summary.meta)
        } else {
            summary.aus
        };

        let decision = self.scorer.score(&aus, &summary.meta);
        debug!(
            dominant = %decision.dominant_dimension,
            value = decision.dominant_value,
            combos = ?decision.active_combos,
            "window scored"
        );

        let record = DecisionRecord {
            engine_id: self.id,
            computed_at: summary.ended_at,
            window_frames: summary.frame_count,
            decision,
        };
        notify(&mut self.on_decision, &record, "decision");
        self.current_decision = Some(record);
    }

    /// Use `current` as the neutral face
    pub fn calibrate(&mut self, current: &ActionUnits) {
        self.smoothing.calibrate(current);
    }

    /// Clear the manual offsets
    pub fn reset_calibration(&mut self) {
        self.smoothing.reset_calibration();
    }

    /// Re-baseline physical validation on the next frame
    pub fn reset_validation(&mut self) {
        self.smoothing.reset_validation();
    }

    pub fn is_calibrated(&self) -> bool {
        self.smoothing.is_calibrated()
    }

    /// Serialize the manual calibration to JSON
    pub fn save_calibration(&self) -> Result<String, ComputeError> {
        serde_json::to_string(self.smoothing.calibration())
            .map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    /// Restore a calibration saved by [`Self::save_calibration`]
    pub fn load_calibration(&mut self, json: &str) -> Result<(), ComputeError> {
        let calibration: CalibrationState =
            serde_json::from_str(json).map_err(|e| ComputeError::CalibrationError(e.to_string()))?;
        info!(calibrated = calibration.calibrated, "calibration loaded");
        self.smoothing.set_calibration(calibration);
        Ok(())
    }

    pub fn current_decision(&self) -> Option<&ExpressionResult> {
        self.current_decision.as_ref().map(|record| &record.decision)
    }

    /// Empty the window buffer; the aggregation clock restarts at the next frame
    pub fn clear_buffer(&mut self) {
        self.window.clear();
    }

    /// Register the per-frame callback (replaces any previous one)
    pub fn on_result(&mut self, callback: impl FnMut(&FrameResult) + 'static) {
        self.on_result = Some(Box::new(callback));
    }

    /// Register the per-decision callback (replaces any previous one)
    pub fn on_decision(&mut self, callback: impl FnMut(&DecisionRecord) + 'static) {
        self.on_decision = Some(Box::new(callback));
    }

    /// Micro/macro classification of the buffered history of one AU
    pub fn expression_timing(&self, au: &str) -> Option<ExpressionTiming> {
        self.window.classify_timing(au, DEFAULT_TIMING_THRESHOLD)
    }

    pub fn window(&self) -> &WindowAggregator {
        &self.window
    }

    pub fn buffer_len(&self) -> usize {
        self.window.len()
    }

    pub fn window_capacity(&self) -> usize {
        self.window.capacity()
    }
}

/// Strain-evidence floors and boosts
fn apply_strain(aus: &mut ActionUnits, strain: &RegionStrain) {
    if strain.brow < BROW_STRAIN_LIMIT {
        let au4 = aus.entry("AU4".to_string()).or_insert(0.0);
        *au4 = au4.max(BROW_AU_FLOOR);
    }
    if strain.nose < NOSE_STRAIN_LIMIT {
        let au9 = aus.entry("AU9".to_string()).or_insert(0.0);
        *au9 = au9.max(NOSE_AU_FLOOR);
    }
    if strain.mouth.abs() > MOUTH_STRAIN_LIMIT {
        for code in MOUTH_BOOSTED {
            if let Some(value) = aus.get_mut(code) {
                if *value > 0.1 {
                    *value += MOUTH_AU_BOOST;
                }
            }
        }
    }
}

/// Run a callback; a panic inside it is logged and swallowed
fn notify<T>(callback: &mut Option<Box<dyn FnMut(&T)>>, value: &T, kind: &str) {
    if let Some(callback) = callback.as_mut() {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            error!(callback = kind, "callback panicked, continuing with the frame");
        }
    }
}
