//! Core types for the FACS Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: detector observations, action unit intensities, meta signals,
//! per-frame results and windowed decisions.

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

/// Action unit code (e.g. "AU4") to intensity.
///
/// Ordered by code so that every aggregation over AUs is reproducible.
pub type ActionUnits = BTreeMap<String, f64>;

/// Normalized 3D landmark coordinate (x/y roughly in [0, 1])
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Named blendshape score from the face tracking model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blendshape {
    #[serde(alias = "categoryName")]
    pub category_name: String,
    pub score: f64,
}

impl Blendshape {
    pub fn new(category_name: impl Into<String>, score: f64) -> Self {
        Self {
            category_name: category_name.into(),
            score,
        }
    }
}

/// One detected face: landmarks plus blendshape scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub blendshapes: Vec<Blendshape>,
}

impl FaceObservation {
    /// Blendshape scores keyed by category name (last score wins on duplicates)
    pub fn blendshape_scores(&self) -> HashMap<String, f64> {
        self.blendshapes
            .iter()
            .map(|b| (b.category_name.clone(), b.score))
            .collect()
    }
}

/// A video frame handed to the engine.
///
/// Pixels are optional: only the dense-flow strain strategy reads them.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
    /// Packed RGBA8 pixels, row-major, `width * height * 4` bytes
    pub rgba: Option<Vec<u8>>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            width,
            height,
            timestamp,
            rgba: None,
        }
    }

    pub fn with_rgba(mut self, rgba: Vec<u8>) -> Self {
        self.rgba = Some(rgba);
        self
    }
}

/// Gaze classification for a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GazeStatus {
    Direct,
    ThinkingUp,
    ThinkingDown,
    Sideway,
    Error,
}

/// Categorical and pose signals derived per frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetaSignals {
    pub gaze: GazeStatus,
    pub is_speaking: bool,
    /// Head yaw (degrees)
    pub head_yaw: f64,
    /// Head pitch (degrees)
    pub head_pitch: f64,
}

impl Default for MetaSignals {
    fn default() -> Self {
        Self {
            gaze: GazeStatus::Direct,
            is_speaking: false,
            head_yaw: 0.0,
            head_pitch: 0.0,
        }
    }
}

/// Decision produced once per elapsed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub dominant_dimension: String,
    /// Clamped dominant score, rounded (-100..=100)
    pub dominant_value: i32,
    /// Tag (or id) of every combo rule that fired, in rule order
    pub active_combos: Vec<String>,
    /// Clamped score per dimension, in configured dimension order
    pub scores: OrderedMap<f64>,
    pub recommended_actions: Vec<String>,
    pub questions: Vec<String>,
}

/// Output of one processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub aus: ActionUnits,
    pub meta: MetaSignals,
    pub rot_penalty: f64,
    /// Buffer occupancy reached 30% of the window capacity
    pub is_stable: bool,
    pub current_decision: Option<ExpressionResult>,
}

/// A pre-detected frame as exchanged over JSON (FFI and NDJSON input)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInput {
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub blendshapes: Vec<Blendshape>,
}

impl FrameInput {
    pub fn into_parts(self) -> (VideoFrame, FaceObservation) {
        (
            VideoFrame::new(self.width, self.height, self.timestamp),
            FaceObservation {
                landmarks: self.landmarks,
                blendshapes: self.blendshapes,
            },
        )
    }
}

/// String-keyed map that keeps insertion (declaration) order.
///
/// Used wherever configuration order carries meaning: AU mapping order,
/// validation order and dimension order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced key keeps its original position
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.position(&key) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V> {
    marker: PhantomData<V>,
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor {
            marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_keeps_declaration_order() {
        let map: OrderedMap<f64> =
            serde_json::from_str(r#"{"zeta": 1.0, "alpha": 2.0, "mid": 3.0}"#).unwrap();
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"zeta":1.0,"alpha":2.0,"mid":3.0}"#);
    }

    #[test]
    fn test_ordered_map_replace_keeps_position() {
        let mut map = OrderedMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("a", 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map.position("a"), Some(0));
        assert_eq!(map.get("a"), Some(&3));
    }

    #[test]
    fn test_frame_input_accepts_mediapipe_names() {
        let input: FrameInput = serde_json::from_str(
            r#"{"timestamp": "2024-01-15T10:00:00Z", "width": 640, "height": 480,
                "landmarks": [{"x": 0.1, "y": 0.2}],
                "blendshapes": [{"categoryName": "jawOpen", "score": 0.3}]}"#,
        )
        .unwrap();
        let (frame, face) = input.into_parts();
        assert_eq!(frame.width, 640);
        assert!(frame.rgba.is_none());
        assert_eq!(face.landmarks[0].z, 0.0);
        assert_eq!(face.blendshape_scores()["jawOpen"], 0.3);
    }

    #[test]
    fn test_gaze_status_wire_names() {
        let json = serde_json::to_string(&GazeStatus::ThinkingDown).unwrap();
        assert_eq!(json, "\"THINKING_DOWN\"");
    }

    #[test]
    fn test_blendshape_scores_lookup() {
        let obs = FaceObservation {
            landmarks: vec![],
            blendshapes: vec![
                Blendshape::new("browDownLeft", 0.4),
                Blendshape::new("jawOpen", 0.2),
            ],
        };
        let scores = obs.blendshape_scores();
        assert_eq!(scores.get("browDownLeft"), Some(&0.4));
        assert_eq!(scores.get("missing"), None);
    }
}
