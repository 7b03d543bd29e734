//! FACS Flux - On-device facial action unit engine
//!
//! Flux turns per-frame face landmarks and blendshape scores into action unit
//! (AU) intensities and, once per time window, into an explainable
//! conversational-state decision through a deterministic pipeline:
//! AU mapping → physical validation → hybrid smoothing → motion strain
//! → gaze/speech meta → window aggregation → decision scoring.
//!
//! ## Modules
//!
//! - **Feature stages**: [`mapping`], [`validator`], [`smoothing`], [`motion`],
//!   [`attention`], [`speech`]
//! - **Temporal stages**: [`window`], [`conflict`], [`scoring`]
//! - **Orchestration**: [`engine::ExpressionEngine`], configured by
//!   [`config::EngineConfig`]

pub mod attention;
pub mod config;
pub mod conflict;
pub mod detector;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod mapping;
pub mod motion;
pub mod scoring;
pub mod smoothing;
pub mod speech;
pub mod types;
pub mod validator;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use detector::{FaceDetector, RecordedDetector};
pub use engine::{DecisionRecord, ExpressionEngine};
pub use error::ComputeError;
pub use motion::{OpticalFlow, StrainEstimator, StrainStrategy};
pub use scoring::{DecisionScorer, FacsConfig};
pub use types::{
    ActionUnits, Blendshape, ExpressionResult, FaceObservation, FrameInput, FrameResult,
    GazeStatus, LandmarkPoint, MetaSignals, VideoFrame,
};

/// Flux version reported by the CLI and FFI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name attached to CLI output
pub const PRODUCER_NAME: &str = "facs-flux";
