//! Threat Monitoring Sessions
//!
//! One monitoring session per user, each driven by its own periodic task:
//! sample both detectors concurrently, fuse, evaluate the threat state,
//! record the event, and raise alerts on escalation. SOS, resolve, and
//! status queries go through the same per-session serialization point.

pub mod config;
pub mod sensors;

mod manager;
mod session;

pub use config::{MonitorConfig, SessionConfig};
pub use manager::{AlertOutcome, SessionManager, SosOutcome, TickReport};
pub use sensors::{FeedDetector, FeedRegistry, SensorFeed, SensorPair, SensorProvider};
pub use session::{SessionHandle, StatusSnapshot};

use alerting::AlertError;
use signal_fusion::FusionError;
use threat_state::StateError;
use thiserror::Error;

/// Monitoring error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Monitoring already active for {0}")]
    AlreadyActive(String),

    #[error("Monitoring not active for {0}")]
    NotActive(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Alert dispatch failed: {0}")]
    DispatchFailure(#[from] AlertError),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl From<FusionError> for MonitorError {
    fn from(e: FusionError) -> Self {
        MonitorError::ConfigInvalid(e.to_string())
    }
}

impl From<StateError> for MonitorError {
    fn from(e: StateError) -> Self {
        MonitorError::ConfigInvalid(e.to_string())
    }
}

impl From<::config::ConfigError> for MonitorError {
    fn from(e: ::config::ConfigError) -> Self {
        MonitorError::ConfigInvalid(e.to_string())
    }
}
