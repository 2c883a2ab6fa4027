//! Edge-triggered escalation detection

use threat_state::ThreatState;
use tracing::debug;

/// Decides when an escalation deserves a notification.
///
/// Fires on entry into HIGH or CRITICAL, not while the state stays there.
/// Remembers the lowest alerting level seen since the last notification, so
/// HIGH -> CRITICAL fires again but CRITICAL -> CRITICAL does not. Dropping
/// below HIGH re-arms it.
#[derive(Debug, Clone, Default)]
pub struct EscalationTrigger {
    alerted: Option<ThreatState>,
}

impl EscalationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the state after an evaluation; returns true if an alert is due
    pub fn observe(&mut self, state: ThreatState) -> bool {
        if !state.is_alerting() {
            if self.alerted.take().is_some() {
                debug!("Escalation trigger re-armed at {}", state);
            }
            return false;
        }

        let fire = match self.alerted {
            Some(level) => state > level,
            None => true,
        };
        self.alerted = Some(state);
        fire
    }

    /// Mark a level as already notified without firing (used after SOS,
    /// which notifies on its own)
    pub fn suppress(&mut self, state: ThreatState) {
        if state.is_alerting() {
            self.alerted = Some(state);
        }
    }

    /// Level last notified, if still within an alerting episode
    pub fn alerted(&self) -> Option<ThreatState> {
        self.alerted
    }
}
