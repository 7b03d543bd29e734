//! Error types for FACS Flux

use thiserror::Error;

/// Errors that can occur while configuring or running the engine
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Face detector error: {0}")]
    DetectorError(String),

    #[error("Motion strain estimator unavailable: {0}")]
    StrainUnavailable(String),

    #[error("Motion strain estimation failed: {0}")]
    StrainError(String),

    #[error("Optical flow error: {0}")]
    OpticalFlowError(String),

    #[error("Calibration error: {0}")]
    CalibrationError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
