//! Session Manager Implementation

use alerting::{AlertDispatcher, AlertError, AlertKind, AlertPayload, DispatchReport, Location};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use signal_fusion::{Detector, FusedScore, Reading, SignalFuser};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use threat_state::{Event, ThreatState, Transition, Trigger};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::sensors::{SensorPair, SensorProvider};
use crate::session::{Session, SessionHandle, StatusSnapshot};
use crate::MonitorError;

/// What happened on the alerting side of a tick
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// No escalation edge this tick
    None,
    /// Escalation edge, but auto-alert is off for the session
    Suppressed,
    /// Contacts notified
    Dispatched(DispatchReport),
    /// Dispatch failed; the transition stands
    Failed(AlertError),
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub fused: FusedScore,
    pub transition: Transition,
    pub alert: AlertOutcome,
}

/// Result of an SOS, reported back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosOutcome {
    pub message: String,
    pub contacts_notified: usize,
    pub state: ThreatState,
}

/// Shared, immutable pieces every session task uses
struct Pipeline {
    config: MonitorConfig,
    fuser: SignalFuser,
    dispatcher: Arc<AlertDispatcher>,
}

impl Pipeline {
    /// Sample both detectors concurrently, each bounded by the tick interval.
    /// An overrunning detector is abandoned, not joined.
    async fn sample(&self, sensors: &SensorPair) -> (Reading, Reading) {
        let budget = self.config.session.tick_interval();
        tokio::join!(
            sample_detector(sensors.motion.clone(), budget),
            sample_detector(sensors.speech.clone(), budget),
        )
    }

    /// Sample, then apply
    async fn tick(&self, session: &Session) -> Result<TickReport, MonitorError> {
        let sensors = match (&session.sensors, session.is_active()) {
            (Some(sensors), true) => sensors,
            _ => return Err(MonitorError::NotActive(session.user.clone())),
        };

        let (motion, speech) = self.sample(sensors).await;
        self.apply(session, &motion, &speech).await
    }

    /// Fuse readings into the session state and raise alerts on escalation
    async fn apply(
        &self,
        session: &Session,
        motion: &Reading,
        speech: &Reading,
    ) -> Result<TickReport, MonitorError> {
        let (fused, transition, event, alert_due) = {
            let mut core = session.core.lock().await;
            if !session.is_active() {
                return Err(MonitorError::NotActive(session.user.clone()));
            }

            let fused = self.fuser.fuse(motion, speech, core.score);
            let transition = core.machine.transition(fused.score);

            core.score = fused.score;
            core.motion_contribution = fused.motion_contribution;
            core.speech_contribution = fused.speech_contribution;

            let event = core.record(
                Event::new(Trigger::Periodic, transition.from, transition.to, fused.score)
                    .with_contributions(fused.motion_contribution, fused.speech_contribution),
            );
            let alert_due = core.escalation.observe(transition.to);

            (fused, transition, event, alert_due)
        };

        metrics::counter!("safewatch_ticks_total").increment(1);
        if transition.changed() {
            metrics::counter!("safewatch_transitions_total", "to" => transition.to.as_str())
                .increment(1);
            info!(
                "{}: threat state {} -> {} (score {:.3})",
                session.user, transition.from, transition.to, fused.score
            );
        }
        self.dispatcher.record_event(&session.user, &event).await;

        let alert = if !alert_due {
            AlertOutcome::None
        } else if !session.auto_alert() {
            debug!(
                "{}: escalation to {} not alerted, auto-alert off",
                session.user, transition.to
            );
            AlertOutcome::Suppressed
        } else {
            self.auto_alert(session, transition.to, fused.score).await
        };

        Ok(TickReport {
            fused,
            transition,
            alert,
        })
    }

    async fn auto_alert(&self, session: &Session, state: ThreatState, score: f64) -> AlertOutcome {
        let payload = AlertPayload {
            kind: AlertKind::ThreatAlert,
            user: session.user.clone(),
            state,
            score,
            location: session.location(),
            timestamp: Utc::now(),
        };

        match self.dispatcher.dispatch(&payload).await {
            Ok(report) => {
                metrics::counter!("safewatch_alerts_dispatched_total", "kind" => "threat_alert")
                    .increment(1);

                let event = {
                    let mut core = session.core.lock().await;
                    let current = core.machine.state();
                    let (motion, speech) = (core.motion_contribution, core.speech_contribution);
                    core.record(
                        Event::new(Trigger::AutoAlert, current, current, score)
                            .with_contributions(motion, speech),
                    )
                };
                self.dispatcher.record_event(&session.user, &event).await;

                AlertOutcome::Dispatched(report)
            }
            Err(e) => {
                metrics::counter!("safewatch_dispatch_failures_total", "kind" => "threat_alert")
                    .increment(1);
                warn!("{}: auto-alert for {} failed: {}", session.user, state, e);
                AlertOutcome::Failed(e)
            }
        }
    }
}

async fn sample_detector(detector: Arc<dyn Detector>, budget: Duration) -> Reading {
    let source = detector.source();
    let task = tokio::task::spawn_blocking(move || detector.sample());

    let reading = match tokio::time::timeout(budget, task).await {
        Ok(Ok(reading)) => reading,
        Ok(Err(e)) => Reading::unavailable(source, format!("detector failed: {}", e)),
        Err(_) => Reading::unavailable(source, "detector timed out"),
    };

    if let Reading::Unavailable { reason, .. } = &reading {
        metrics::counter!("safewatch_sensor_unavailable_total", "source" => source.as_str())
            .increment(1);
        warn!("{} sensor unavailable: {}", source, reason);
    }
    reading
}

/// Periodic loop of one session. Exits when the session is cancelled.
async fn run_session(pipeline: Arc<Pipeline>, session: Arc<Session>) {
    let interval = pipeline.config.session.tick_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let Some(sensors) = session.sensors.clone() else {
        return;
    };

    info!("{}: monitoring loop started ({:?} interval)", session.user, interval);

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();

        // Stop must not wait on sensors
        let (motion, speech) = tokio::select! {
            _ = session.cancel.cancelled() => break,
            readings = pipeline.sample(&sensors) => readings,
        };

        if let Err(e) = pipeline.apply(&session, &motion, &speech).await {
            match e {
                MonitorError::NotActive(_) => break,
                e => warn!("{}: tick failed: {}", session.user, e),
            }
        }

        let elapsed = started.elapsed();
        if elapsed > interval {
            let skipped = (elapsed.as_millis() / interval.as_millis().max(1)) as u64;
            metrics::counter!("safewatch_ticks_skipped_total").increment(skipped);
            debug!("{}: tick took {:?}, skipping {} slot(s)", session.user, elapsed, skipped);
        }
    }

    info!("{}: monitoring loop stopped", session.user);
}

/// Owns every user's monitoring session.
///
/// Records are keyed by the user name the caller passes in. `sos` and
/// `update_location` create a record for an unknown user, and only `logout`
/// removes one, so user names must come from an authenticated caller.
pub struct SessionManager {
    pipeline: Arc<Pipeline>,
    sensors: Arc<dyn SensorProvider>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Create a manager. Invalid configuration is fatal here.
    pub fn new(
        config: MonitorConfig,
        sensors: Arc<dyn SensorProvider>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let fuser = SignalFuser::new(config.fusion.clone())?;
        info!("Creating session manager");

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                config,
                fuser,
                dispatcher,
            }),
            sensors,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.pipeline.config
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.pipeline.dispatcher
    }

    /// Start monitoring `user`. Must be called inside a tokio runtime.
    pub async fn start(&self, user: &str) -> Result<SessionHandle, MonitorError> {
        if self.get(user).is_some_and(|s| s.is_active()) {
            return Err(MonitorError::AlreadyActive(user.to_string()));
        }

        let sensors = self.sensors.open(user).await?;
        let session = Arc::new(Session::start(user, sensors, &self.pipeline.config)?);

        {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if sessions.get(user).is_some_and(|s| s.is_active()) {
                return Err(MonitorError::AlreadyActive(user.to_string()));
            }
            sessions.insert(user.to_string(), session.clone());
        }

        tokio::spawn(run_session(self.pipeline.clone(), session.clone()));
        self.update_active_gauge();

        info!("Started threat monitoring for {} (session {})", user, session.id);
        Ok(session.handle())
    }

    /// Stop monitoring. Idempotent; returns whether a session was running.
    pub fn stop(&self, user: &str) -> bool {
        let stopped = self.get(user).is_some_and(|s| s.deactivate());

        if stopped {
            self.update_active_gauge();
            info!("Stopped threat monitoring for {}", user);
        } else {
            debug!("Stop requested for {} but monitoring was not active", user);
        }
        stopped
    }

    /// Stop and forget the user's session record
    pub fn logout(&self, user: &str) {
        self.stop(user);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
        info!("Cleared monitoring session for {}", user);
    }

    /// Run one tick now, outside the periodic schedule
    pub async fn tick(&self, user: &str) -> Result<TickReport, MonitorError> {
        let session = self.require(user)?;
        self.pipeline.tick(&session).await
    }

    /// Force CRITICAL and notify every contact, reporting the outcome.
    ///
    /// Holds the session's serialization point through dispatch, so no tick
    /// can change the state until the SOS completes. Works without an active
    /// session.
    pub async fn sos(&self, user: &str) -> Result<SosOutcome, MonitorError> {
        let session = self.get_or_detached(user)?;
        warn!("SOS triggered by {}", user);

        let mut core = session.core.lock().await;
        let transition = core.machine.force_sos();
        core.escalation.suppress(ThreatState::Critical);

        let payload = AlertPayload {
            kind: AlertKind::Sos,
            user: user.to_string(),
            state: ThreatState::Critical,
            score: core.score,
            location: session.location(),
            timestamp: Utc::now(),
        };
        let result = self.pipeline.dispatcher.dispatch(&payload).await;

        let event = Event::new(Trigger::Sos, transition.from, transition.to, core.score)
            .with_contributions(core.motion_contribution, core.speech_contribution);
        let event = core.record(event);
        drop(core);

        self.pipeline.dispatcher.record_event(user, &event).await;

        match result {
            Ok(report) => {
                metrics::counter!("safewatch_alerts_dispatched_total", "kind" => "sos")
                    .increment(1);
                let message = if report.attempted == 0 {
                    "SOS recorded, but no emergency contacts are registered".to_string()
                } else {
                    "Emergency contacts have been notified".to_string()
                };
                Ok(SosOutcome {
                    message,
                    contacts_notified: report.delivered,
                    state: ThreatState::Critical,
                })
            }
            Err(e) => {
                metrics::counter!("safewatch_dispatch_failures_total", "kind" => "sos")
                    .increment(1);
                warn!("SOS dispatch for {} failed: {}", user, e);
                Err(MonitorError::DispatchFailure(e))
            }
        }
    }

    /// Release an SOS hold; the state drops to the current score's band.
    /// A session without a hold is left untouched.
    pub async fn resolve(&self, user: &str) -> Result<StatusSnapshot, MonitorError> {
        let session = self.require(user)?;

        let event = {
            let mut core = session.core.lock().await;
            if !core.machine.is_latched() {
                debug!("{}: nothing to resolve, no SOS hold", user);
                drop(core);
                return Ok(session.snapshot(self.pipeline.config.session.status_history).await);
            }

            let score = core.score;
            let transition = core.machine.resolve(score);

            if transition.to.is_alerting() {
                core.escalation.suppress(transition.to);
            } else {
                core.escalation.observe(transition.to);
            }

            let event = Event::new(Trigger::Resolve, transition.from, transition.to, score)
                .with_contributions(core.motion_contribution, core.speech_contribution);
            core.record(event)
        };

        self.pipeline.dispatcher.record_event(user, &event).await;
        Ok(session.snapshot(self.pipeline.config.session.status_history).await)
    }

    /// Current status, including the recent event window
    pub async fn status(&self, user: &str) -> Result<StatusSnapshot, MonitorError> {
        let session = self.require(user)?;
        Ok(session.snapshot(self.pipeline.config.session.status_history).await)
    }

    /// Up to `limit` most recent events, oldest first
    pub async fn history(&self, user: &str, limit: usize) -> Result<Vec<Event>, MonitorError> {
        let session = self.require(user)?;
        let core = session.core.lock().await;
        Ok(core.events.recent(limit))
    }

    /// Status of every known session
    pub async fn overview(&self) -> Vec<StatusSnapshot> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot(0).await);
        }
        snapshots.sort_by(|a, b| a.user.cmp(&b.user));
        snapshots
    }

    pub fn set_auto_alert(&self, user: &str, enabled: bool) -> Result<(), MonitorError> {
        let session = self.require(user)?;
        session.set_auto_alert(enabled);
        info!("Auto-alert {} for {}", if enabled { "enabled" } else { "disabled" }, user);
        Ok(())
    }

    /// Remember the user's position for alert payloads
    pub fn update_location(&self, user: &str, location: Location) -> Result<(), MonitorError> {
        self.get_or_detached(user)?.set_location(location);
        debug!("Location updated for {}", user);
        Ok(())
    }

    pub fn is_active(&self, user: &str) -> bool {
        self.get(user).is_some_and(|s| s.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// Stop every session (process shutdown)
    pub fn shutdown(&self) {
        let users: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        for user in users {
            self.stop(&user);
        }
    }

    fn get(&self, user: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }

    fn require(&self, user: &str) -> Result<Arc<Session>, MonitorError> {
        self.get(user)
            .ok_or_else(|| MonitorError::NotActive(user.to_string()))
    }

    fn get_or_detached(&self, user: &str) -> Result<Arc<Session>, MonitorError> {
        if let Some(session) = self.get(user) {
            return Ok(session);
        }

        let detached = Arc::new(Session::detached(user, &self.pipeline.config)?);
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .entry(user.to_string())
            .or_insert(detached)
            .clone())
    }

    fn update_active_gauge(&self) {
        metrics::gauge!("safewatch_active_sessions").set(self.active_count() as f64);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
