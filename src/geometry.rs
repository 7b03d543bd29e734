//! Landmark geometry
//!
//! Pure distance, vector and divergence math over normalized landmark points.
//! Pixel-space helpers scale x/y by the frame size and ignore z.

use crate::types::LandmarkPoint;

/// Nose tip (MediaPipe face mesh)
pub const NOSE_TIP: usize = 1;
/// Left face edge, near the ear
pub const LEFT_EAR: usize = 234;
/// Right face edge, near the ear
pub const RIGHT_EAR: usize = 454;
/// Left iris center (refined mesh only)
pub const LEFT_IRIS: usize = 468;
/// Left eye corners (start, end)
pub const LEFT_EYE_CORNERS: (usize, usize) = (33, 133);
pub const UPPER_LIP: usize = 13;
pub const LOWER_LIP: usize = 14;
pub const CHIN: usize = 152;

pub type Vec3 = [f64; 3];

/// 3D Euclidean distance in normalized space
pub fn euclidean_distance(p1: &LandmarkPoint, p2: &LandmarkPoint) -> f64 {
    ((p1.x - p2.x).powi(2) + (p1.y - p2.y).powi(2) + (p1.z - p2.z).powi(2)).sqrt()
}

/// 2D distance in pixel space
pub fn euclidean_distance_2d(p1: &LandmarkPoint, p2: &LandmarkPoint, w: f64, h: f64) -> f64 {
    let dx = (p1.x - p2.x) * w;
    let dy = (p1.y - p2.y) * h;
    (dx * dx + dy * dy).sqrt()
}

/// Vector from `start` to `end`
pub fn vector(start: &LandmarkPoint, end: &LandmarkPoint) -> Vec3 {
    [end.x - start.x, end.y - start.y, end.z - start.z]
}

pub fn vector_norm(v: Vec3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Speed of a point relative to an anchor (head motion removed).
///
/// Returns 0 for a non-positive time step.
pub fn relative_velocity(
    pos_curr: Vec3,
    pos_prev: Vec3,
    anchor_curr: Vec3,
    anchor_prev: Vec3,
    dt: f64,
) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }

    let clean = [
        ((pos_curr[0] - pos_prev[0]) - (anchor_curr[0] - anchor_prev[0])) / dt,
        ((pos_curr[1] - pos_prev[1]) - (anchor_curr[1] - anchor_prev[1])) / dt,
        ((pos_curr[2] - pos_prev[2]) - (anchor_curr[2] - anchor_prev[2])) / dt,
    ];
    vector_norm(clean)
}

/// Mean pixel distance of a landmark subset from its centroid.
///
/// Missing landmarks contribute the origin, matching how detectors pad
/// short meshes. An empty index list yields 0.
pub fn divergence(landmarks: &[LandmarkPoint], indices: &[usize], w: f64, h: f64) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }

    let pts: Vec<(f64, f64)> = indices
        .iter()
        .map(|&i| {
            landmarks
                .get(i)
                .map(|p| (p.x * w, p.y * h))
                .unwrap_or((0.0, 0.0))
        })
        .collect();

    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.1).sum::<f64>() / n;

    pts.iter()
        .map(|(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n
}

/// Horizontal position of the nose between the face edges (0.5 = frontal).
///
/// `None` when the landmarks are missing or the face has no width.
pub fn yaw_ratio(landmarks: &[LandmarkPoint]) -> Option<f64> {
    let nose = landmarks.get(NOSE_TIP)?;
    let left = landmarks.get(LEFT_EAR)?;
    let right = landmarks.get(RIGHT_EAR)?;

    let face_width = right.x - left.x;
    if face_width.abs() < f64::EPSILON {
        return None;
    }
    Some((nose.x - left.x) / face_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> LandmarkPoint {
        LandmarkPoint::new(x, y, 0.0)
    }

    #[test]
    fn test_euclidean_distance() {
        let a = LandmarkPoint::new(0.0, 0.0, 0.0);
        let b = LandmarkPoint::new(3.0, 4.0, 12.0);
        assert!((euclidean_distance(&a, &b) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_2d_scales_by_frame() {
        let a = p(0.0, 0.0);
        let b = p(0.3, 0.4);
        // (300, 400) in a 1000x1000 frame
        assert!((euclidean_distance_2d(&a, &b, 1000.0, 1000.0) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_relative_velocity_removes_head_motion() {
        let v = relative_velocity(
            [2.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            0.5,
        );
        assert!((v - 2.0).abs() < 1e-12);
        assert_eq!(relative_velocity([1.0; 3], [0.0; 3], [0.0; 3], [0.0; 3], 0.0), 0.0);
    }

    #[test]
    fn test_divergence_is_mean_distance() {
        // Square of side 2 px around (1, 1): every corner is sqrt(2) away
        let landmarks = vec![p(0.0, 0.0), p(0.002, 0.0), p(0.0, 0.002), p(0.002, 0.002)];
        let d = divergence(&landmarks, &[0, 1, 2, 3], 1000.0, 1000.0);
        assert!((d - 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_divergence_empty_indices() {
        assert_eq!(divergence(&[p(0.5, 0.5)], &[], 640.0, 480.0), 0.0);
    }

    #[test]
    fn test_yaw_ratio_requires_landmarks() {
        assert_eq!(yaw_ratio(&[p(0.5, 0.5)]), None);

        let mut landmarks = vec![p(0.0, 0.0); 455];
        landmarks[NOSE_TIP] = p(0.5, 0.5);
        landmarks[LEFT_EAR] = p(0.3, 0.5);
        landmarks[RIGHT_EAR] = p(0.7, 0.5);
        assert!((yaw_ratio(&landmarks).unwrap() - 0.5).abs() < 1e-12);
    }
}
