//! Threat states and score bands

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StateError;

/// Threat level, ordered by severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatState {
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatState {
    /// All states, least severe first
    pub const ALL: [ThreatState; 5] = [
        ThreatState::Safe,
        ThreatState::Low,
        ThreatState::Medium,
        ThreatState::High,
        ThreatState::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatState::Safe => "SAFE",
            ThreatState::Low => "LOW",
            ThreatState::Medium => "MEDIUM",
            ThreatState::High => "HIGH",
            ThreatState::Critical => "CRITICAL",
        }
    }

    /// HIGH and CRITICAL warrant notifying contacts
    pub fn is_alerting(&self) -> bool {
        *self >= ThreatState::High
    }
}

impl fmt::Display for ThreatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the LOW..CRITICAL bands. SAFE starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 0.2,
            medium: 0.4,
            high: 0.6,
            critical: 0.8,
        }
    }
}

impl Thresholds {
    /// Require strictly increasing bounds inside (0, 1]
    pub fn validate(&self) -> Result<(), StateError> {
        let bounds = [0.0, self.low, self.medium, self.high, self.critical];
        let increasing = bounds.windows(2).all(|w| w[0] < w[1]);

        if !increasing || !(self.critical <= 1.0) {
            return Err(StateError::NonMonotonicThresholds(*self));
        }
        Ok(())
    }

    /// Lower bound of a state's band
    pub fn lower_bound(&self, state: ThreatState) -> f64 {
        match state {
            ThreatState::Safe => 0.0,
            ThreatState::Low => self.low,
            ThreatState::Medium => self.medium,
            ThreatState::High => self.high,
            ThreatState::Critical => self.critical,
        }
    }

    /// Nominal band for a score, without hysteresis
    pub fn band(&self, score: f64) -> ThreatState {
        if score >= self.critical {
            ThreatState::Critical
        } else if score >= self.high {
            ThreatState::High
        } else if score >= self.medium {
            ThreatState::Medium
        } else if score >= self.low {
            ThreatState::Low
        } else {
            ThreatState::Safe
        }
    }
}

/// State machine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Band boundaries
    pub thresholds: Thresholds,
    /// Distance below a band's lower bound required to leave it (default: 0.05)
    pub margin: f64,
    /// Consecutive de-escalating ticks that release an SOS latch.
    /// 0 keeps CRITICAL until an explicit resolve.
    pub sos_release_ticks: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            margin: 0.05,
            sos_release_ticks: 10,
        }
    }
}

impl StateConfig {
    pub fn validate(&self) -> Result<(), StateError> {
        self.thresholds.validate()?;

        if !self.margin.is_finite() || self.margin < 0.0 || self.margin >= self.thresholds.low {
            return Err(StateError::InvalidMargin {
                margin: self.margin,
                low: self.thresholds.low,
            });
        }
        Ok(())
    }
}
