//! Session event record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::ThreatState;

/// What caused an event to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Regular monitoring tick
    Periodic,
    /// Manual SOS
    Sos,
    /// Contacts notified automatically on escalation
    AutoAlert,
    /// SOS latch released by an explicit resolve
    Resolve,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::Sos => "sos",
            Trigger::AutoAlert => "auto_alert",
            Trigger::Resolve => "resolve",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one evaluation of a session.
///
/// Fields are read-only once constructed; history buffers hand out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    timestamp: DateTime<Utc>,
    trigger: Trigger,
    previous_state: ThreatState,
    state: ThreatState,
    score: f64,
    motion_contribution: f64,
    speech_contribution: f64,
}

impl Event {
    /// Create an event stamped now
    pub fn new(
        trigger: Trigger,
        previous_state: ThreatState,
        state: ThreatState,
        score: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            trigger,
            previous_state,
            state,
            score,
            motion_contribution: 0.0,
            speech_contribution: 0.0,
        }
    }

    /// Attach the contribution breakdown of the fused score
    pub fn with_contributions(mut self, motion: f64, speech: f64) -> Self {
        self.motion_contribution = motion;
        self.speech_contribution = speech;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn previous_state(&self) -> ThreatState {
        self.previous_state
    }

    pub fn state(&self) -> ThreatState {
        self.state
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn motion_contribution(&self) -> f64 {
        self.motion_contribution
    }

    pub fn speech_contribution(&self) -> f64 {
        self.speech_contribution
    }

    /// Whether the state changed with this event
    pub fn is_transition(&self) -> bool {
        self.previous_state != self.state
    }
}
