//! Signal Fusion Engine
//!
//! Combines the two independent sensor streams into one threat score:
//! - Motion intensity (camera frames)
//! - Speech/audio distress likelihood (microphone chunks)
//!
//! Detectors only produce bounded readings; the fuser weights the readings
//! that are currently available and smooths the result against the previous
//! score.

pub mod fuser;
pub mod signal;

pub use fuser::{FusedScore, FusionConfig, SignalFuser};
pub use signal::{Detector, Reading, Signal, SignalSource};

use thiserror::Error;

/// Fusion error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight for {signal}: {value}")]
    InvalidWeight { signal: SignalSource, value: f64 },

    #[error("At least one signal weight must be positive")]
    ZeroWeights,

    #[error("Smoothing factor {0} must be in (0, 1]")]
    InvalidSmoothing(f64),
}
