//! Dense optical-flow strain estimator
//!
//! For each region: crop a padded bounding box from the grayscale frame,
//! compute dense flow against the previous crop of the same size, and turn
//! the mean flow divergence (du/dx + dv/dy) into strain.

use super::{Region, RegionStrain, StrainEstimator, StrainInput};
use crate::error::ComputeError;
use crate::types::{LandmarkPoint, VideoFrame};
use std::collections::HashMap;
use tracing::warn;

const DIVERGENCE_GAIN: f64 = 2000.0;
const CROP_PADDING: usize = 10;
/// Regions whose landmark box is smaller than this (px) are skipped
const MIN_REGION_SIZE: usize = 5;

/// Single-channel 8-bit image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    pub width: usize,
    pub height: usize,
    /// Row-major luma, `width * height` bytes
    pub data: Vec<u8>,
}

impl GrayFrame {
    /// Convert packed RGBA8 pixels to luma (ITU-R BT.601 weights)
    pub fn from_rgba(width: usize, height: usize, rgba: &[u8]) -> Result<Self, ComputeError> {
        let expected = width * height * 4;
        if rgba.len() != expected {
            return Err(ComputeError::OpticalFlowError(format!(
                "expected {expected} RGBA bytes for {width}x{height}, got {}",
                rgba.len()
            )));
        }

        let data = rgba
            .chunks_exact(4)
            .map(|px| {
                let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect();

        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_video_frame(frame: &VideoFrame) -> Result<Self, ComputeError> {
        let rgba = frame.rgba.as_deref().ok_or_else(|| {
            ComputeError::StrainUnavailable("frame carries no pixel data".to_string())
        })?;
        Self::from_rgba(frame.width as usize, frame.height as usize, rgba)
    }

    /// Copy out a sub-rectangle; `None` if it is empty after clipping
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Option<GrayFrame> {
        let x2 = (x + width).min(self.width);
        let y2 = (y + height).min(self.height);
        if x2 <= x || y2 <= y {
            return None;
        }

        let crop_w = x2 - x;
        let mut data = Vec::with_capacity(crop_w * (y2 - y));
        for row in y..y2 {
            let start = row * self.width + x;
            data.extend_from_slice(&self.data[start..start + crop_w]);
        }

        Some(GrayFrame {
            width: crop_w,
            height: y2 - y,
            data,
        })
    }
}

/// Per-pixel flow vectors, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub width: usize,
    pub height: usize,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl FlowField {
    /// Mean of du/dx + dv/dy using central differences (one-sided at edges)
    pub fn mean_divergence(&self) -> f64 {
        let (w, h) = (self.width, self.height);
        if w == 0 || h == 0 || self.u.len() < w * h || self.v.len() < w * h {
            return 0.0;
        }

        let mut sum = 0.0;
        for y in 0..h {
            for x in 0..w {
                let du_dx = gradient(x, w, |i| self.u[y * w + i] as f64);
                let dv_dy = gradient(y, h, |j| self.v[j * w + x] as f64);
                sum += du_dx + dv_dy;
            }
        }
        sum / (w * h) as f64
    }
}

fn gradient(i: usize, len: usize, at: impl Fn(usize) -> f64) -> f64 {
    if len < 2 {
        return 0.0;
    }
    if i == 0 {
        at(1) - at(0)
    } else if i == len - 1 {
        at(i) - at(i - 1)
    } else {
        (at(i + 1) - at(i - 1)) / 2.0
    }
}

/// External dense optical-flow primitive (e.g. Farneback)
pub trait OpticalFlow {
    /// Flow from `prev` to `curr`; both crops have equal dimensions
    fn dense_flow(&mut self, prev: &GrayFrame, curr: &GrayFrame) -> Result<FlowField, ComputeError>;
}

/// Padded pixel box around a region, clipped to the frame
fn region_box(
    landmarks: &[LandmarkPoint],
    indices: &[usize],
    frame_w: usize,
    frame_h: usize,
) -> Option<(usize, usize, usize, usize)> {
    let pts: Vec<(f64, f64)> = indices
        .iter()
        .map(|&i| {
            landmarks
                .get(i)
                .map(|p| (p.x * frame_w as f64, p.y * frame_h as f64))
                .unwrap_or((0.0, 0.0))
        })
        .collect();

    let min_x = pts.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = pts.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    if !min_x.is_finite() || !min_y.is_finite() {
        return None;
    }

    let box_w = (max_x - min_x).ceil() as usize;
    let box_h = (max_y - min_y).ceil() as usize;
    if box_w < MIN_REGION_SIZE || box_h < MIN_REGION_SIZE {
        return None;
    }

    let bx = min_x.floor().max(0.0) as usize;
    let by = min_y.floor().max(0.0) as usize;
    let x1 = bx.saturating_sub(CROP_PADDING);
    let y1 = by.saturating_sub(CROP_PADDING);
    let x2 = (bx + box_w + CROP_PADDING).min(frame_w);
    let y2 = (by + box_h + CROP_PADDING).min(frame_h);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some((x1, y1, x2 - x1, y2 - y1))
}

pub struct DenseFlowStrainEstimator {
    flow: Box<dyn OpticalFlow>,
    previous_crops: HashMap<Region, GrayFrame>,
}

impl DenseFlowStrainEstimator {
    pub fn new(flow: Box<dyn OpticalFlow>) -> Self {
        Self {
            flow,
            previous_crops: HashMap::new(),
        }
    }
}

impl StrainEstimator for DenseFlowStrainEstimator {
    fn analyze(&mut self, input: &StrainInput<'_>) -> Result<RegionStrain, ComputeError> {
        let gray = GrayFrame::from_video_frame(input.frame)?;
        let mut result = RegionStrain::default();

        for region in Region::ALL {
            let Some((x, y, w, h)) =
                region_box(input.landmarks, region.landmark_indices(), gray.width, gray.height)
            else {
                continue;
            };
            let Some(current) = gray.crop(x, y, w, h) else {
                continue;
            };

            let comparable = self
                .previous_crops
                .get(&region)
                .filter(|prev| prev.width == current.width && prev.height == current.height);

            if let Some(prev) = comparable {
                match self.flow.dense_flow(prev, &current) {
                    Ok(field) => result.set(region, field.mean_divergence() * DIVERGENCE_GAIN),
                    Err(e) => warn!(?region, error = %e, "optical flow failed for region"),
                }
            }

            self.previous_crops.insert(region, current);
        }

        Ok(result)
    }

    fn reset(&mut self) {
        self.previous_crops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Flow that expands uniformly: u = k * x, v = k * y
    struct ExpandingFlow {
        k: f32,
    }

    impl OpticalFlow for ExpandingFlow {
        fn dense_flow(&mut self, prev: &GrayFrame, _curr: &GrayFrame) -> Result<FlowField, ComputeError> {
            let (w, h) = (prev.width, prev.height);
            let mut u = Vec::with_capacity(w * h);
            let mut v = Vec::with_capacity(w * h);
            for y in 0..h {
                for x in 0..w {
                    u.push(self.k * x as f32);
                    v.push(self.k * y as f32);
                }
            }
            Ok(FlowField {
                width: w,
                height: h,
                u,
                v,
            })
        }
    }

    /// Zero flow that counts how often it is asked
    struct CountingFlow {
        calls: Rc<Cell<u32>>,
    }

    impl OpticalFlow for CountingFlow {
        fn dense_flow(&mut self, prev: &GrayFrame, _curr: &GrayFrame) -> Result<FlowField, ComputeError> {
            self.calls.set(self.calls.get() + 1);
            let n = prev.width * prev.height;
            Ok(FlowField {
                width: prev.width,
                height: prev.height,
                u: vec![0.0; n],
                v: vec![0.0; n],
            })
        }
    }

    struct FailingFlow;

    impl OpticalFlow for FailingFlow {
        fn dense_flow(&mut self, _: &GrayFrame, _: &GrayFrame) -> Result<FlowField, ComputeError> {
            Err(ComputeError::OpticalFlowError("backend offline".to_string()))
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(200, 200, Utc::now()).with_rgba(vec![128; 200 * 200 * 4])
    }

    fn spread_mesh() -> Vec<LandmarkPoint> {
        // Alternate points so every region box is 40x40 px around the center
        mesh_between(0.4, 0.6)
    }

    fn mesh_between(low: f64, high: f64) -> Vec<LandmarkPoint> {
        (0..478)
            .map(|i| {
                if i % 2 == 0 {
                    LandmarkPoint::new(low, low, 0.0)
                } else {
                    LandmarkPoint::new(high, high, 0.0)
                }
            })
            .collect()
    }

    #[test]
    fn test_grayscale_conversion() {
        let gray = GrayFrame::from_rgba(2, 1, &[255, 0, 0, 255, 0, 0, 255, 255]).unwrap();
        assert_eq!(gray.data, vec![76, 29]);
        assert!(GrayFrame::from_rgba(2, 2, &[0; 4]).is_err());
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let gray = GrayFrame {
            width: 4,
            height: 3,
            data: (0..12).collect(),
        };
        let crop = gray.crop(2, 1, 10, 10).unwrap();
        assert_eq!((crop.width, crop.height), (2, 2));
        assert_eq!(crop.data, vec![6, 7, 10, 11]);
        assert!(gray.crop(4, 0, 1, 1).is_none());
    }

    #[test]
    fn test_uniform_expansion_divergence() {
        let field = ExpandingFlow { k: 0.01 }
            .dense_flow(
                &GrayFrame {
                    width: 8,
                    height: 6,
                    data: vec![0; 48],
                },
                &GrayFrame {
                    width: 8,
                    height: 6,
                    data: vec![0; 48],
                },
            )
            .unwrap();
        assert!((field.mean_divergence() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_first_frame_only_stores_crops() {
        let mut est = DenseFlowStrainEstimator::new(Box::new(ExpandingFlow { k: 0.01 }));
        let landmarks = spread_mesh();
        let f = frame();
        let input = StrainInput {
            frame: &f,
            landmarks: &landmarks,
        };

        assert_eq!(est.analyze(&input).unwrap(), RegionStrain::default());
        let second = est.analyze(&input).unwrap();
        assert!((second.brow - 0.02 * 2000.0).abs() < 1e-3);
        assert!((second.mouth - 0.02 * 2000.0).abs() < 1e-3);
    }

    #[test]
    fn test_missing_pixels_is_unavailable() {
        let mut est = DenseFlowStrainEstimator::new(Box::new(FailingFlow));
        let f = VideoFrame::new(200, 200, Utc::now());
        let landmarks = spread_mesh();
        let result = est.analyze(&StrainInput {
            frame: &f,
            landmarks: &landmarks,
        });
        assert!(matches!(result, Err(ComputeError::StrainUnavailable(_))));
    }

    #[test]
    fn test_flow_failure_degrades_to_zero() {
        let mut est = DenseFlowStrainEstimator::new(Box::new(FailingFlow));
        let landmarks = spread_mesh();
        let f = frame();
        let input = StrainInput {
            frame: &f,
            landmarks: &landmarks,
        };
        est.analyze(&input).unwrap();
        assert_eq!(est.analyze(&input).unwrap(), RegionStrain::default());
    }

    #[test]
    fn test_resized_crop_skips_flow() {
        let calls = Rc::new(Cell::new(0));
        let mut est = DenseFlowStrainEstimator::new(Box::new(CountingFlow {
            calls: calls.clone(),
        }));
        let f = frame();
        let narrow = spread_mesh();
        let wide = mesh_between(0.3, 0.7);

        est.analyze(&StrainInput {
            frame: &f,
            landmarks: &narrow,
        })
        .unwrap();

        // Every region box grows from 40 to 80 px: nothing comparable
        let resized = est
            .analyze(&StrainInput {
                frame: &f,
                landmarks: &wide,
            })
            .unwrap();
        assert_eq!(resized, RegionStrain::default());
        assert_eq!(calls.get(), 0);

        // Same size again: one flow call per region
        est.analyze(&StrainInput {
            frame: &f,
            landmarks: &wide,
        })
        .unwrap();
        assert_eq!(calls.get(), Region::ALL.len() as u32);
    }
}
