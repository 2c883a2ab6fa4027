//! Threat state machine with hysteresis and SOS latch

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::event::Trigger;
use crate::state::{StateConfig, ThreatState};
use crate::StateError;

/// Result of one call into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ThreatState,
    pub to: ThreatState,
    pub trigger: Trigger,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

/// Held after an SOS until resolved or enough calm ticks pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SosLatch {
    /// Consecutive ticks whose score would have de-escalated CRITICAL
    pub calm_ticks: u32,
}

/// Authoritative threat state of one session.
///
/// The state is private and only changes through `transition`,
/// `force_sos`, and `resolve`.
#[derive(Debug, Clone)]
pub struct ThreatStateMachine {
    config: StateConfig,
    state: ThreatState,
    latch: Option<SosLatch>,
}

impl ThreatStateMachine {
    /// Create a machine in SAFE
    pub fn new(config: StateConfig) -> Result<Self, StateError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ThreatState::Safe,
            latch: None,
        })
    }

    pub fn state(&self) -> ThreatState {
        self.state
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn is_latched(&self) -> bool {
        self.latch.is_some()
    }

    pub fn latch(&self) -> Option<SosLatch> {
        self.latch
    }

    /// Where `score` would take a machine currently in `from`.
    ///
    /// Escalation applies at the nominal threshold. De-escalation needs the
    /// score below `lower_bound(from) - margin`, then lands on the score's
    /// nominal band.
    pub fn target(&self, from: ThreatState, score: f64) -> ThreatState {
        let thresholds = &self.config.thresholds;
        let nominal = thresholds.band(score);

        if nominal >= from {
            return nominal;
        }

        if score < thresholds.lower_bound(from) - self.config.margin {
            nominal
        } else {
            from
        }
    }

    /// Periodic evaluation of a new smoothed score
    pub fn transition(&mut self, score: f64) -> Transition {
        let from = self.state;
        let target = self.target(from, score);

        if let Some(latch) = self.latch.as_mut() {
            if target >= from {
                latch.calm_ticks = 0;
                return self.hold(from);
            }

            latch.calm_ticks += 1;
            let release_after = self.config.sos_release_ticks;
            if release_after == 0 || latch.calm_ticks < release_after {
                debug!(
                    "SOS latch holding {} ({}/{} calm ticks)",
                    from, latch.calm_ticks, release_after
                );
                return self.hold(from);
            }

            info!("SOS latch released after {} calm ticks", latch.calm_ticks);
            self.latch = None;
        }

        self.state = target;
        if target != from {
            debug!("Threat state {} -> {} (score {:.3})", from, target, score);
        }

        Transition {
            from,
            to: target,
            trigger: Trigger::Periodic,
        }
    }

    /// Force CRITICAL and latch it, regardless of score
    pub fn force_sos(&mut self) -> Transition {
        let from = self.state;
        self.state = ThreatState::Critical;
        self.latch = Some(SosLatch::default());
        info!("SOS forced threat state {} -> CRITICAL", from);

        Transition {
            from,
            to: ThreatState::Critical,
            trigger: Trigger::Sos,
        }
    }

    /// Release the SOS latch and drop straight to the score's nominal band.
    /// Without a latch nothing changes; hysteresis stays in charge.
    pub fn resolve(&mut self, score: f64) -> Transition {
        let from = self.state;
        if self.latch.take().is_none() {
            debug!("Resolve ignored, no SOS latch held in {}", from);
            return Transition {
                from,
                to: from,
                trigger: Trigger::Resolve,
            };
        }

        self.state = self.config.thresholds.band(score);
        info!("Threat state resolved {} -> {}", from, self.state);

        Transition {
            from,
            to: self.state,
            trigger: Trigger::Resolve,
        }
    }

    fn hold(&self, state: ThreatState) -> Transition {
        Transition {
            from: state,
            to: state,
            trigger: Trigger::Periodic,
        }
    }
}

impl Default for ThreatStateMachine {
    fn default() -> Self {
        Self {
            config: StateConfig::default(),
            state: ThreatState::Safe,
            latch: None,
        }
    }
}
