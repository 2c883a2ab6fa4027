//! Alert Dispatcher Implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use threat_state::{Event, ThreatState};
use tracing::{debug, info, warn};

use crate::notifier::{
    ActivityLog, AlertKind, AlertPayload, Contact, ContactDirectory, ContactNotifier, Location,
};
use crate::AlertError;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Notifications kept for the history view (default: 100)
    pub notification_history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notification_history: 100,
        }
    }
}

/// One notification sent (or attempted) to one contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub kind: AlertKind,
    pub user: String,
    pub contact: Contact,
    pub message: String,
    pub state: ThreatState,
    pub score: f64,
    pub location: Option<Location>,
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
}

/// Summary of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub kind: AlertKind,
    pub attempted: usize,
    pub delivered: usize,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Sends alerts to a user's contacts and forwards events to the activity log
pub struct AlertDispatcher {
    config: AlertConfig,
    notifier: Arc<dyn ContactNotifier>,
    directory: Arc<dyn ContactDirectory>,
    activity: Arc<dyn ActivityLog>,
    history: Mutex<VecDeque<NotificationRecord>>,
}

impl AlertDispatcher {
    /// Create a new dispatcher
    pub fn new(
        config: AlertConfig,
        notifier: Arc<dyn ContactNotifier>,
        directory: Arc<dyn ContactDirectory>,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        info!(
            "Creating alert dispatcher with notifier '{}' and config: {:?}",
            notifier.name(),
            config
        );
        Self {
            history: Mutex::new(VecDeque::with_capacity(config.notification_history)),
            config,
            notifier,
            directory,
            activity,
        }
    }

    /// Notify every registered contact of `payload.user`.
    ///
    /// Returns an error when the directory or notifier fails outright, or
    /// when no delivery succeeded. No contacts is not an error.
    pub async fn dispatch(&self, payload: &AlertPayload) -> Result<DispatchReport, AlertError> {
        let contacts = self.directory.contacts(&payload.user).await?;

        if contacts.is_empty() {
            warn!(
                "No emergency contacts registered for {}, {} not delivered",
                payload.user,
                payload.kind.as_str()
            );
            return Ok(DispatchReport {
                kind: payload.kind,
                attempted: 0,
                delivered: 0,
            });
        }

        let deliveries = self.notifier.notify(&contacts, payload).await?;
        let message = payload.message();
        let delivered = deliveries.iter().filter(|d| d.is_sent()).count();

        for delivery in &deliveries {
            if let crate::DeliveryStatus::Failed { reason } = &delivery.status {
                warn!(
                    "Delivery of {} to {} failed: {}",
                    payload.kind.as_str(),
                    delivery.contact.name,
                    reason
                );
            }

            self.remember(NotificationRecord {
                kind: payload.kind,
                user: payload.user.clone(),
                contact: delivery.contact.clone(),
                message: message.clone(),
                state: payload.state,
                score: payload.score,
                location: payload.location,
                timestamp: payload.timestamp,
                delivered: delivery.is_sent(),
            });
        }

        let report = DispatchReport {
            kind: payload.kind,
            attempted: deliveries.len(),
            delivered,
        };

        if delivered == 0 {
            return Err(AlertError::AllDeliveriesFailed {
                attempted: report.attempted,
            });
        }

        info!(
            "Dispatched {} for {}: {}/{} contacts notified",
            payload.kind.as_str(),
            payload.user,
            delivered,
            report.attempted
        );
        Ok(report)
    }

    /// Forward an event to the activity log. Failures are logged only.
    pub async fn record_event(&self, user: &str, event: &Event) {
        if let Err(e) = self.activity.record(user, event).await {
            warn!("Activity log rejected event for {}: {}", user, e);
        } else {
            debug!("Recorded {} event for {}", event.trigger(), user);
        }
    }

    /// Most recent notifications, newest first
    pub fn history(&self, limit: usize) -> Vec<NotificationRecord> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    fn remember(&self, record: NotificationRecord) {
        if self.config.notification_history == 0 {
            return;
        }
        if let Ok(mut history) = self.history.lock() {
            while history.len() >= self.config.notification_history {
                history.pop_front();
            }
            history.push_back(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryActivityLog, MemoryNotifier};
    use crate::notifier::{Delivery, StaticDirectory};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use threat_state::Trigger;

    fn payload(kind: AlertKind, user: &str) -> AlertPayload {
        AlertPayload {
            kind,
            user: user.to_string(),
            state: ThreatState::Critical,
            score: 0.9,
            location: Some(Location { lat: 52.5, lng: 13.4 }),
            timestamp: Utc::now(),
        }
    }

    fn directory() -> Arc<StaticDirectory> {
        let mut contacts = HashMap::new();
        contacts.insert(
            "alice".to_string(),
            vec![
                Contact::new("Bob", "+100", "bob@example.com"),
                Contact::new("Carol", "+200", "carol@example.com"),
            ],
        );
        Arc::new(StaticDirectory::new(contacts))
    }

    fn dispatcher(notifier: Arc<dyn ContactNotifier>, history: usize) -> AlertDispatcher {
        AlertDispatcher::new(
            AlertConfig {
                notification_history: history,
            },
            notifier,
            directory(),
            Arc::new(MemoryActivityLog::new()),
        )
    }

    /// Delivers to the first contact only
    struct HalfNotifier;

    #[async_trait]
    impl ContactNotifier for HalfNotifier {
        fn name(&self) -> &str {
            "half"
        }

        async fn notify(
            &self,
            contacts: &[Contact],
            _payload: &AlertPayload,
        ) -> Result<Vec<Delivery>, AlertError> {
            Ok(contacts
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    if i == 0 {
                        Delivery::sent(c.clone())
                    } else {
                        Delivery::failed(c.clone(), "unreachable")
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_sos_reaches_every_contact() {
        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = dispatcher(notifier.clone(), 100);

        let report = dispatcher
            .dispatch(&payload(AlertKind::Sos, "alice"))
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(notifier.last_contacts().len(), 2);

        let history = dispatcher.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "URGENT: SOS activated by alice");
        assert!(history.iter().all(|r| r.delivered));
    }

    #[tokio::test]
    async fn test_no_contacts_is_not_an_error() {
        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = dispatcher(notifier.clone(), 100);

        let report = dispatcher
            .dispatch(&payload(AlertKind::Sos, "nobody"))
            .await
            .unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(notifier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_reported() {
        let notifier = Arc::new(MemoryNotifier::new());
        notifier.set_failure(Some("gateway down"));
        let dispatcher = dispatcher(notifier.clone(), 100);

        let err = dispatcher
            .dispatch(&payload(AlertKind::ThreatAlert, "alice"))
            .await
            .unwrap_err();

        assert!(matches!(err, AlertError::Notifier(ref reason) if reason == "gateway down"));
    }

    #[tokio::test]
    async fn test_partial_delivery_succeeds() {
        let dispatcher = dispatcher(Arc::new(HalfNotifier), 100);

        let report = dispatcher
            .dispatch(&payload(AlertKind::ThreatAlert, "alice"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(dispatcher.history(10).iter().filter(|r| !r.delivered).count(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dispatcher = dispatcher(Arc::new(MemoryNotifier::new()), 3);

        for _ in 0..4 {
            dispatcher
                .dispatch(&payload(AlertKind::ThreatAlert, "alice"))
                .await
                .unwrap();
        }

        assert_eq!(dispatcher.history(100).len(), 3);
        assert_eq!(dispatcher.history(1).len(), 1);
    }

    #[tokio::test]
    async fn test_record_event_reaches_activity_log() {
        let activity = Arc::new(MemoryActivityLog::new());
        let dispatcher = AlertDispatcher::new(
            AlertConfig::default(),
            Arc::new(MemoryNotifier::new()),
            directory(),
            activity.clone(),
        );

        let event = Event::new(Trigger::Sos, ThreatState::Safe, ThreatState::Critical, 0.1);
        dispatcher.record_event("alice", &event).await;

        assert_eq!(activity.events_for("alice"), vec![event]);
        assert!(activity.events_for("bob").is_empty());
    }
}
