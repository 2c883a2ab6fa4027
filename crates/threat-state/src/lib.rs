//! Threat State Tracking
//!
//! Maps the smoothed threat score onto ordered discrete states:
//! - Band lookup against configurable thresholds
//! - Hysteresis on de-escalation (fast up, slow down)
//! - SOS latch that holds CRITICAL until resolved
//!
//! Also defines the immutable `Event` recorded for every evaluation.

pub mod event;
pub mod machine;
pub mod state;

pub use event::{Event, Trigger};
pub use machine::{SosLatch, ThreatStateMachine, Transition};
pub use state::{StateConfig, ThreatState, Thresholds};

use thiserror::Error;

/// State machine error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Thresholds must satisfy 0 < low < medium < high < critical <= 1, got {0:?}")]
    NonMonotonicThresholds(Thresholds),

    #[error("Hysteresis margin {margin} must be in [0, {low})")]
    InvalidMargin { margin: f64, low: f64 },
}
