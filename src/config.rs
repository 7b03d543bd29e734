//! Engine configuration
//!
//! One JSON document bundles every tunable of the engine. Omitted sections
//! fall back to the rule sets shipped under `config/`.

use crate::error::ComputeError;
use crate::mapping::{MappingConfig, MappingIssue};
use crate::motion::StrainStrategy;
use crate::scoring::FacsConfig;
use crate::smoothing::SmoothingConfig;
use crate::validator::ValidationConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_WINDOW_SECONDS: f64 = 4.0;
pub const DEFAULT_FPS: u32 = 30;

/// Per-feature thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Combined head and iris deviation tolerated as direct gaze
    pub max_gaze_deviation: f64,
    /// Lip gap / nose-chin distance above which the person is speaking
    pub speaking_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_gaze_deviation: 30.0,
            speaking_threshold: 0.2,
        }
    }
}

/// When and how motion strain runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainConfig {
    pub strategy: StrainStrategy,
    /// Frames between estimator runs
    pub interval_frames: u32,
    /// Rotation penalty at or above which strain is skipped
    pub max_rotation_penalty: f64,
}

impl Default for StrainConfig {
    fn default() -> Self {
        Self {
            strategy: StrainStrategy::Landmark,
            interval_frames: 3,
            max_rotation_penalty: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "bundled_mappings")]
    pub mappings: MappingConfig,
    #[serde(default = "bundled_validations")]
    pub validations: ValidationConfig,
    /// Scoring rules; validated on load
    #[serde(default = "bundled_facs", deserialize_with = "deserialize_facs")]
    pub facs: FacsConfig,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub strain: StrainConfig,
    /// Zero context-explained AUs before scoring
    #[serde(default)]
    pub context_suppression: bool,
}

fn default_window_seconds() -> f64 {
    DEFAULT_WINDOW_SECONDS
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

// The bundled files are covered by tests; an empty rule set keeps serde defaults infallible.
fn bundled_mappings() -> MappingConfig {
    MappingConfig::bundled().unwrap_or_default()
}

fn bundled_validations() -> ValidationConfig {
    ValidationConfig::bundled().unwrap_or_default()
}

fn bundled_facs() -> FacsConfig {
    FacsConfig::bundled().unwrap_or_default()
}

fn deserialize_facs<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<FacsConfig, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    FacsConfig::from_value(value).map_err(serde::de::Error::custom)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mappings: bundled_mappings(),
            validations: bundled_validations(),
            facs: bundled_facs(),
            window_seconds: DEFAULT_WINDOW_SECONDS,
            fps: DEFAULT_FPS,
            thresholds: Thresholds::default(),
            smoothing: SmoothingConfig::default(),
            strain: StrainConfig::default(),
            context_suppression: false,
        }
    }
}

impl EngineConfig {
    /// Bundled defaults, failing loudly if a bundled file is broken
    pub fn bundled() -> Result<Self, ComputeError> {
        Ok(Self {
            mappings: MappingConfig::bundled()?,
            validations: ValidationConfig::bundled()?,
            facs: FacsConfig::bundled()?,
            ..Self::default()
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(self).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    /// Check the whole configuration; returns non-fatal mapping issues
    pub fn validate(&self) -> Result<Vec<MappingIssue>, ComputeError> {
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(ComputeError::InvalidConfig(format!(
                "window_seconds must be positive, got {}",
                self.window_seconds
            )));
        }
        if self.fps == 0 {
            return Err(ComputeError::InvalidConfig("fps must be positive".to_string()));
        }
        if (self.window_seconds * self.fps as f64).floor() < 1.0 {
            return Err(ComputeError::InvalidConfig(
                "window_seconds * fps must hold at least one frame".to_string(),
            ));
        }
        if self.strain.interval_frames == 0 {
            return Err(ComputeError::InvalidConfig(
                "strain.interval_frames must be at least 1".to_string(),
            ));
        }

        self.smoothing.validate()?;
        self.validations.validate()?;
        self.facs.validate()?;

        let (fatal, warnings): (Vec<_>, Vec<_>) =
            self.mappings.lint().into_iter().partition(MappingIssue::is_fatal);
        if let Some(MappingIssue::SelfReference { au }) = fatal.first() {
            return Err(ComputeError::InvalidConfig(format!("mapping for {au} references itself")));
        }
        for issue in &warnings {
            warn!(?issue, "mapping reference resolves to 0");
        }

        Ok(warnings)
    }
}
