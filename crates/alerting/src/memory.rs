//! In-memory collaborators for tests

use async_trait::async_trait;
use std::sync::Mutex;
use threat_state::Event;

use crate::notifier::{ActivityLog, AlertPayload, Contact, ContactNotifier, Delivery};
use crate::AlertError;

/// In-memory notifier that records every call. Can be switched into a
/// failing mode to exercise dispatch failures.
#[derive(Default)]
pub struct MemoryNotifier {
    calls: Mutex<Vec<(Vec<Contact>, AlertPayload)>>,
    failing: Mutex<Option<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail with `reason` (None restores delivery)
    pub fn set_failure(&self, reason: Option<&str>) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = reason.map(str::to_string);
        }
    }

    /// Payloads received so far
    pub fn payloads(&self) -> Vec<AlertPayload> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Contacts passed on the most recent call
    pub fn last_contacts(&self) -> Vec<Contact> {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.last().map(|(c, _)| c.clone()))
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ContactNotifier for MemoryNotifier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(
        &self,
        contacts: &[Contact],
        payload: &AlertPayload,
    ) -> Result<Vec<Delivery>, AlertError> {
        let failing = self
            .failing
            .lock()
            .map_err(|e| AlertError::Notifier(format!("Lock error: {}", e)))?
            .clone();

        self.calls
            .lock()
            .map_err(|e| AlertError::Notifier(format!("Lock error: {}", e)))?
            .push((contacts.to_vec(), payload.clone()));

        match failing {
            Some(reason) => Err(AlertError::Notifier(reason)),
            None => Ok(contacts.iter().cloned().map(Delivery::sent).collect()),
        }
    }
}

/// In-memory activity log
#[derive(Default)]
pub struct MemoryActivityLog {
    entries: Mutex<Vec<(String, Event)>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded for one user, oldest first
    pub fn events_for(&self, user: &str) -> Vec<Event> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(u, _)| u == user)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn record(&self, user: &str, event: &Event) -> Result<(), AlertError> {
        self.entries
            .lock()
            .map_err(|e| AlertError::ActivityLog(format!("Lock error: {}", e)))?
            .push((user.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::AlertKind;
    use chrono::Utc;
    use threat_state::ThreatState;

    fn payload() -> AlertPayload {
        AlertPayload {
            kind: AlertKind::ThreatAlert,
            user: "alice".to_string(),
            state: ThreatState::High,
            score: 0.7,
            location: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_notifier_records_and_fails_on_demand() {
        let notifier = MemoryNotifier::new();
        let contacts = vec![Contact::new("Bob", "+100", "")];

        let deliveries = notifier.notify(&contacts, &payload()).await.unwrap();
        assert!(deliveries.iter().all(Delivery::is_sent));

        notifier.set_failure(Some("offline"));
        assert!(notifier.notify(&contacts, &payload()).await.is_err());
        assert_eq!(notifier.call_count(), 2);
        assert_eq!(notifier.last_contacts(), contacts);
    }
}
