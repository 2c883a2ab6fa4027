//! Per-user monitoring session state

use alerting::{EscalationTrigger, Location};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use threat_state::{Event, ThreatState, ThreatStateMachine};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::sensors::SensorPair;
use crate::MonitorError;

/// Returned by `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub user: String,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub user: String,
    pub session_id: Uuid,
    pub active: bool,
    pub state: ThreatState,
    pub score: f64,
    pub motion_contribution: f64,
    pub speech_contribution: f64,
    pub auto_alert: bool,
    pub sos_latched: bool,
    pub location: Option<Location>,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub history: Vec<Event>,
}

/// Most-recent-N event buffer
pub(crate) struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` latest events, oldest first
    pub(crate) fn recent(&self, limit: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }
}

/// Mutable part of a session, guarded by the session's serialization point
pub(crate) struct SessionCore {
    pub(crate) machine: ThreatStateMachine,
    pub(crate) score: f64,
    pub(crate) motion_contribution: f64,
    pub(crate) speech_contribution: f64,
    pub(crate) escalation: EscalationTrigger,
    pub(crate) events: EventLog,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SessionCore {
    /// Append to the history and return a copy for the activity log
    pub(crate) fn record(&mut self, event: Event) -> Event {
        self.updated_at = event.timestamp();
        self.events.push(event.clone());
        event
    }
}

/// One user's monitoring run.
///
/// `core` is a FIFO-fair async mutex: ticks, SOS, and resolve queue on it
/// in arrival order and never hold it across detector I/O.
pub(crate) struct Session {
    pub(crate) user: String,
    pub(crate) id: Uuid,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) sensors: Option<SensorPair>,
    pub(crate) cancel: CancellationToken,
    pub(crate) core: tokio::sync::Mutex<SessionCore>,
    active: AtomicBool,
    auto_alert: AtomicBool,
    location: Mutex<Option<Location>>,
}

impl Session {
    /// Active session with sensors, about to be ticked
    pub(crate) fn start(
        user: &str,
        sensors: SensorPair,
        config: &MonitorConfig,
    ) -> Result<Self, MonitorError> {
        Self::build(user, Some(sensors), true, config)
    }

    /// Inactive record without sensors (SOS or location before monitoring)
    pub(crate) fn detached(user: &str, config: &MonitorConfig) -> Result<Self, MonitorError> {
        Self::build(user, None, false, config)
    }

    fn build(
        user: &str,
        sensors: Option<SensorPair>,
        active: bool,
        config: &MonitorConfig,
    ) -> Result<Self, MonitorError> {
        let now = Utc::now();
        let core = SessionCore {
            machine: ThreatStateMachine::new(config.states.clone())?,
            score: 0.0,
            motion_contribution: 0.0,
            speech_contribution: 0.0,
            escalation: EscalationTrigger::new(),
            events: EventLog::new(config.session.history_capacity),
            updated_at: now,
        };

        Ok(Self {
            user: user.to_string(),
            id: Uuid::new_v4(),
            started_at: now,
            sensors,
            cancel: CancellationToken::new(),
            core: tokio::sync::Mutex::new(core),
            active: AtomicBool::new(active),
            auto_alert: AtomicBool::new(config.session.auto_alert),
            location: Mutex::new(None),
        })
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            user: self.user.clone(),
            session_id: self.id,
            started_at: self.started_at,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop ticking. Returns false if already inactive.
    pub(crate) fn deactivate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.cancel.cancel();
        was_active
    }

    pub(crate) fn auto_alert(&self) -> bool {
        self.auto_alert.load(Ordering::SeqCst)
    }

    pub(crate) fn set_auto_alert(&self, enabled: bool) {
        self.auto_alert.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn location(&self) -> Option<Location> {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_location(&self, location: Location) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = Some(location);
    }

    /// Snapshot for status queries
    pub(crate) async fn snapshot(&self, history: usize) -> StatusSnapshot {
        let core = self.core.lock().await;
        StatusSnapshot {
            user: self.user.clone(),
            session_id: self.id,
            active: self.is_active(),
            state: core.machine.state(),
            score: core.score,
            motion_contribution: core.motion_contribution,
            speech_contribution: core.speech_contribution,
            auto_alert: self.auto_alert(),
            sos_latched: core.machine.is_latched(),
            location: self.location(),
            started_at: self.started_at,
            timestamp: core.updated_at,
            history: core.events.recent(history),
        }
    }
}
