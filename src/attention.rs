//! Attention tracking
//!
//! Classifies gaze from head yaw plus left-iris position. Every frame is
//! classified independently.

use crate::geometry::{self, LEFT_EAR, LEFT_EYE_CORNERS, LEFT_IRIS, NOSE_TIP, RIGHT_EAR};
use crate::types::{GazeStatus, LandmarkPoint};
use serde::{Deserialize, Serialize};

const MIN_WIDTH: f64 = 1e-6;
/// Vertical iris offset (x1000) that separates up/down from sideways
const VERTICAL_THRESHOLD: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeAnalysis {
    pub is_looking: bool,
    /// Combined deviation, roughly 0-100
    pub deviation: f64,
    pub status: GazeStatus,
}

impl GazeAnalysis {
    fn error() -> Self {
        Self {
            is_looking: false,
            deviation: 0.0,
            status: GazeStatus::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttentionTracker {
    max_deviation: f64,
}

impl AttentionTracker {
    pub fn new(max_deviation: f64) -> Self {
        Self { max_deviation }
    }

    pub fn analyze(&self, landmarks: &[LandmarkPoint]) -> GazeAnalysis {
        let (Some(nose), Some(left_ear), Some(right_ear)) = (
            landmarks.get(NOSE_TIP),
            landmarks.get(LEFT_EAR),
            landmarks.get(RIGHT_EAR),
        ) else {
            return GazeAnalysis::error();
        };

        let face_width = right_ear.x - left_ear.x;
        if face_width.abs() < MIN_WIDTH {
            return GazeAnalysis::error();
        }
        let head_deviation = ((nose.x - left_ear.x) / face_width - 0.5).abs() * 200.0;

        let (Some(iris), Some(inner), Some(outer)) = (
            landmarks.get(LEFT_IRIS),
            landmarks.get(LEFT_EYE_CORNERS.0),
            landmarks.get(LEFT_EYE_CORNERS.1),
        ) else {
            return GazeAnalysis::error();
        };

        let eye_width = outer.x - inner.x;
        let iris_ratio = if eye_width.abs() < MIN_WIDTH {
            0.5
        } else {
            (iris.x - inner.x) / eye_width
        };
        let iris_deviation = (iris_ratio - 0.5).abs() * 200.0;

        let deviation = head_deviation + iris_deviation * 0.5;

        if deviation <= self.max_deviation {
            return GazeAnalysis {
                is_looking: true,
                deviation,
                status: GazeStatus::Direct,
            };
        }

        let eye_center_y = (inner.y + outer.y) / 2.0;
        let vertical = (iris.y - eye_center_y) * 1000.0;
        let status = if vertical < -VERTICAL_THRESHOLD {
            GazeStatus::ThinkingUp
        } else if vertical > VERTICAL_THRESHOLD {
            GazeStatus::ThinkingDown
        } else {
            GazeStatus::Sideway
        };

        GazeAnalysis {
            is_looking: false,
            deviation,
            status,
        }
    }
}

/// Head (yaw, pitch) in degrees; (0, 0) when the landmarks are missing
pub fn head_pose(landmarks: &[LandmarkPoint]) -> (f64, f64) {
    let (Some(nose), Some(left_ear), Some(right_ear)) = (
        landmarks.get(NOSE_TIP),
        landmarks.get(LEFT_EAR),
        landmarks.get(RIGHT_EAR),
    ) else {
        return (0.0, 0.0);
    };

    let ratio = geometry::yaw_ratio(landmarks).unwrap_or(0.5);
    let yaw = (ratio - 0.5) * 180.0;
    let pitch = (nose.y - (left_ear.y + right_ear.y) / 2.0) * 200.0;
    (yaw, pitch)
}
