//! Motion strain estimation
//!
//! Estimates muscle strain in five facial regions. Two interchangeable
//! strategies implement [`StrainEstimator`]: landmark kinematics (no
//! external dependency) and dense optical flow (backed by an injected
//! [`OpticalFlow`] primitive).

mod dense_flow;
mod landmark;

pub use dense_flow::{DenseFlowStrainEstimator, FlowField, GrayFrame, OpticalFlow};
pub use landmark::LandmarkStrainEstimator;

use crate::error::ComputeError;
use crate::types::{LandmarkPoint, VideoFrame};
use serde::{Deserialize, Serialize};

/// Facial region of interest monitored for strain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Corrugator and frontalis (AU1/2/4)
    Brow,
    /// Procerus and nasalis (AU9)
    Nose,
    /// Left zygomaticus major (AU6/12)
    LeftCheek,
    /// Right zygomaticus major (AU6/12)
    RightCheek,
    /// Orbicularis oris
    Mouth,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::Brow,
        Region::Nose,
        Region::LeftCheek,
        Region::RightCheek,
        Region::Mouth,
    ];

    /// Landmark indices outlining the region
    pub fn landmark_indices(&self) -> &'static [usize] {
        match self {
            Region::Brow => &[336, 107, 66, 296],
            Region::Nose => &[198, 420, 279, 49],
            Region::LeftCheek => &[117, 119, 100, 47],
            Region::RightCheek => &[346, 348, 329, 277],
            Region::Mouth => &[61, 291, 0, 17],
        }
    }
}

/// Strain per region. Negative values indicate contraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionStrain {
    pub brow: f64,
    pub nose: f64,
    pub l_cheek: f64,
    pub r_cheek: f64,
    pub mouth: f64,
}

impl RegionStrain {
    pub fn get(&self, region: Region) -> f64 {
        match region {
            Region::Brow => self.brow,
            Region::Nose => self.nose,
            Region::LeftCheek => self.l_cheek,
            Region::RightCheek => self.r_cheek,
            Region::Mouth => self.mouth,
        }
    }

    pub fn set(&mut self, region: Region, value: f64) {
        match region {
            Region::Brow => self.brow = value,
            Region::Nose => self.nose = value,
            Region::LeftCheek => self.l_cheek = value,
            Region::RightCheek => self.r_cheek = value,
            Region::Mouth => self.mouth = value,
        }
    }
}

/// Everything a strain estimator may read for one frame
#[derive(Debug, Clone, Copy)]
pub struct StrainInput<'a> {
    pub frame: &'a VideoFrame,
    pub landmarks: &'a [LandmarkPoint],
}

impl StrainInput<'_> {
    pub fn width(&self) -> f64 {
        self.frame.width as f64
    }

    pub fn height(&self) -> f64 {
        self.frame.height as f64
    }
}

/// Trait for motion strain strategies
pub trait StrainEstimator {
    /// Strain for the current frame; updates the estimator's previous-frame state
    fn analyze(&mut self, input: &StrainInput<'_>) -> Result<RegionStrain, ComputeError>;

    /// Forget all previous-frame state
    fn reset(&mut self);
}

/// Strain strategy selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrainStrategy {
    #[default]
    Landmark,
    DenseFlow,
}

/// Build the configured estimator.
///
/// The dense-flow strategy needs an optical flow primitive.
pub fn build_estimator(
    strategy: StrainStrategy,
    flow: Option<Box<dyn OpticalFlow>>,
) -> Result<Box<dyn StrainEstimator>, ComputeError> {
    match (strategy, flow) {
        (StrainStrategy::Landmark, _) => Ok(Box::new(LandmarkStrainEstimator::new())),
        (StrainStrategy::DenseFlow, Some(flow)) => {
            Ok(Box::new(DenseFlowStrainEstimator::new(flow)))
        }
        (StrainStrategy::DenseFlow, None) => Err(ComputeError::StrainUnavailable(
            "dense_flow strategy selected but no optical flow primitive was provided".to_string(),
        )),
    }
}
