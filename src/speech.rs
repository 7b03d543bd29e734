//! Visual speech activity detection from mouth opening

use crate::geometry::{euclidean_distance, CHIN, LOWER_LIP, NOSE_TIP, UPPER_LIP};
use crate::types::LandmarkPoint;

#[derive(Debug, Clone)]
pub struct SpeechDetector {
    threshold: f64,
}

impl SpeechDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Lip gap relative to nose-chin distance exceeds the threshold.
    /// Missing landmarks or a degenerate face read as not speaking.
    pub fn is_speaking(&self, landmarks: &[LandmarkPoint]) -> bool {
        opening_ratio(landmarks).is_some_and(|ratio| ratio > self.threshold)
    }
}

pub fn opening_ratio(landmarks: &[LandmarkPoint]) -> Option<f64> {
    let upper = landmarks.get(UPPER_LIP)?;
    let lower = landmarks.get(LOWER_LIP)?;
    let nose = landmarks.get(NOSE_TIP)?;
    let chin = landmarks.get(CHIN)?;

    let reference = euclidean_distance(nose, chin);
    if reference == 0.0 {
        return None;
    }
    Some(euclidean_distance(upper, lower) / reference)
}
