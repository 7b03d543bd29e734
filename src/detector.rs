//! Face detector boundary
//!
//! The landmark/blendshape model lives outside this crate. Callers plug it
//! in through [`FaceDetector`] or hand already-detected faces to
//! [`crate::engine::ExpressionEngine::process_detection`].

use crate::error::ComputeError;
use crate::types::{FaceObservation, VideoFrame};

/// Trait for landmark and blendshape detectors
pub trait FaceDetector {
    /// First face in the frame, or `None` when no face is visible
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceObservation>, ComputeError>;
}

/// Detector replaying pre-recorded observations in order
#[derive(Debug, Clone, Default)]
pub struct RecordedDetector {
    observations: std::collections::VecDeque<Option<FaceObservation>>,
}

impl RecordedDetector {
    pub fn new(observations: impl IntoIterator<Item = Option<FaceObservation>>) -> Self {
        Self {
            observations: observations.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.observations.len()
    }
}

impl FaceDetector for RecordedDetector {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<FaceObservation>, ComputeError> {
        self.observations
            .pop_front()
            .ok_or_else(|| ComputeError::DetectorError("recording exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_recorded_detector_replays_then_errors() {
        let mut detector = RecordedDetector::new(vec![None, Some(FaceObservation::default())]);
        let frame = VideoFrame::new(640, 480, Utc::now());

        assert!(detector.detect(&frame).unwrap().is_none());
        assert!(detector.detect(&frame).unwrap().is_some());
        assert_eq!(detector.remaining(), 0);
        assert!(matches!(detector.detect(&frame), Err(ComputeError::DetectorError(_))));
    }
}
