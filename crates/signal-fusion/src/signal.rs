//! Sensor signals and the detector contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producer of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Motion intensity from the camera
    Motion,
    /// Distress likelihood from ambient audio
    Speech,
}

impl SignalSource {
    /// Stable lowercase name, used for logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Motion => "motion",
            SignalSource::Speech => "speech",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded sensor value in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    source: SignalSource,
    value: f64,
    captured_at: DateTime<Utc>,
}

impl Signal {
    /// Create a signal captured now. The value is clamped to [0, 1];
    /// NaN is treated as 0.
    pub fn new(source: SignalSource, value: f64) -> Self {
        Self::captured(source, value, Utc::now())
    }

    /// Create a signal with an explicit capture time
    pub fn captured(source: SignalSource, value: f64, captured_at: DateTime<Utc>) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self {
            source,
            value,
            captured_at,
        }
    }

    pub fn source(&self) -> SignalSource {
        self.source
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Result of sampling a detector.
///
/// A failed read is `Unavailable`, never a zero-valued signal, so a sensor
/// dropout cannot silently lower the threat score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reading {
    Available(Signal),
    Unavailable {
        source: SignalSource,
        reason: String,
    },
}

impl Reading {
    /// Shorthand for an available reading captured now
    pub fn available(source: SignalSource, value: f64) -> Self {
        Reading::Available(Signal::new(source, value))
    }

    /// Shorthand for an unavailable reading
    pub fn unavailable(source: SignalSource, reason: impl Into<String>) -> Self {
        Reading::Unavailable {
            source,
            reason: reason.into(),
        }
    }

    pub fn source(&self) -> SignalSource {
        match self {
            Reading::Available(signal) => signal.source(),
            Reading::Unavailable { source, .. } => *source,
        }
    }

    /// Clamped value if the reading is available
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Available(signal) => Some(signal.value()),
            Reading::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available(_))
    }
}

/// Sensor classifier contract.
///
/// `sample` must return within one monitoring tick. It may block (model
/// inference, device reads); the session loop runs it off the async
/// executor and abandons it if it overruns.
pub trait Detector: Send + Sync {
    /// Which stream this detector produces
    fn source(&self) -> SignalSource;

    /// Take one reading
    fn sample(&self) -> Reading;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_clamped() {
        assert_eq!(Signal::new(SignalSource::Motion, 1.7).value(), 1.0);
        assert_eq!(Signal::new(SignalSource::Motion, -0.2).value(), 0.0);
        assert_eq!(Signal::new(SignalSource::Speech, f64::NAN).value(), 0.0);
        assert_eq!(Signal::new(SignalSource::Speech, 0.42).value(), 0.42);
    }

    #[test]
    fn test_unavailable_has_no_value() {
        let reading = Reading::unavailable(SignalSource::Motion, "camera busy");
        assert_eq!(reading.value(), None);
        assert_eq!(reading.source(), SignalSource::Motion);
        assert!(!reading.is_available());
    }

    #[test]
    fn test_source_names() {
        assert_eq!(SignalSource::Motion.to_string(), "motion");
        assert_eq!(SignalSource::Speech.as_str(), "speech");
    }
}
