//! Landmark-kinematics strain estimator
//!
//! Strain = mean region velocity * 50 - |velocity change| / dt * 200,
//! with velocity in pixels per second between consecutive analyzed frames.

use super::{Region, RegionStrain, StrainEstimator, StrainInput};
use crate::error::ComputeError;
use crate::types::LandmarkPoint;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

const VELOCITY_GAIN: f64 = 50.0;
const ACCELERATION_GAIN: f64 = 200.0;
/// Gaps longer than this are treated as dropped frames
const MAX_FRAME_GAP_SECS: f64 = 1.0;

#[derive(Debug, Clone)]
struct PreviousFrame {
    landmarks: Vec<LandmarkPoint>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LandmarkStrainEstimator {
    previous: Option<PreviousFrame>,
    velocities: HashMap<Region, f64>,
}

impl LandmarkStrainEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&mut self, input: &StrainInput<'_>) {
        self.previous = Some(PreviousFrame {
            landmarks: input.landmarks.to_vec(),
            timestamp: input.frame.timestamp,
        });
    }
}

/// Mean pixel-space speed of the region's points; z stays unscaled
fn region_velocity(
    current: &[LandmarkPoint],
    previous: &[LandmarkPoint],
    indices: &[usize],
    w: f64,
    h: f64,
    dt: f64,
) -> f64 {
    let speeds: Vec<f64> = indices
        .iter()
        .filter_map(|&i| Some((current.get(i)?, previous.get(i)?)))
        .map(|(c, p)| {
            let dx = (c.x - p.x) * w;
            let dy = (c.y - p.y) * h;
            let dz = c.z - p.z;
            (dx * dx + dy * dy + dz * dz).sqrt() / dt
        })
        .collect();

    if speeds.is_empty() {
        return 0.0;
    }
    speeds.iter().sum::<f64>() / speeds.len() as f64
}

impl StrainEstimator for LandmarkStrainEstimator {
    fn analyze(&mut self, input: &StrainInput<'_>) -> Result<RegionStrain, ComputeError> {
        let mut result = RegionStrain::default();

        let Some(previous) = self.previous.as_ref() else {
            self.store(input);
            return Ok(result);
        };

        let dt = (input.frame.timestamp - previous.timestamp).num_microseconds().unwrap_or(i64::MAX)
            as f64
            / 1_000_000.0;

        if dt <= 0.0 || dt > MAX_FRAME_GAP_SECS {
            debug!(dt, "stale landmark history, restarting strain estimation");
            self.velocities.clear();
            self.store(input);
            return Ok(result);
        }

        for region in Region::ALL {
            let velocity = region_velocity(
                input.landmarks,
                &previous.landmarks,
                region.landmark_indices(),
                input.width(),
                input.height(),
                dt,
            );
            let prev_velocity = self.velocities.get(&region).copied().unwrap_or(0.0);
            let acceleration = (velocity - prev_velocity).abs() / dt;

            result.set(region, velocity * VELOCITY_GAIN - acceleration * ACCELERATION_GAIN);
            self.velocities.insert(region, velocity);
        }

        self.store(input);
        Ok(result)
    }

    fn reset(&mut self) {
        self.previous = None;
        self.velocities.clear();
    }
}
