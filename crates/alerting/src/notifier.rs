//! Outbound collaborators: contact directory, notifier, activity log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use threat_state::{Event, ThreatState};
use tracing::info;

use crate::AlertError;

/// Emergency contact as stored by the account layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: email.into(),
        }
    }
}

/// Last reported position of a user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Why contacts are being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Sos,
    ThreatAlert,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sos => "sos",
            AlertKind::ThreatAlert => "threat_alert",
        }
    }
}

/// Body of a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub user: String,
    pub state: ThreatState,
    pub score: f64,
    pub location: Option<Location>,
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    /// Human-readable line sent to contacts
    pub fn message(&self) -> String {
        match self.kind {
            AlertKind::Sos => format!("URGENT: SOS activated by {}", self.user),
            AlertKind::ThreatAlert => {
                format!("Alert: {} threat level is {}", self.user, self.state)
            }
        }
    }
}

/// Per-contact delivery outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub contact: Contact,
    pub status: DeliveryStatus,
}

impl Delivery {
    pub fn sent(contact: Contact) -> Self {
        Self {
            contact,
            status: DeliveryStatus::Sent,
        }
    }

    pub fn failed(contact: Contact, reason: impl Into<String>) -> Self {
        Self {
            contact,
            status: DeliveryStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self.status, DeliveryStatus::Sent)
    }
}

/// Delivers notifications to contacts. Shared by every session, so it must
/// tolerate concurrent calls.
#[async_trait]
pub trait ContactNotifier: Send + Sync {
    /// Notifier name
    fn name(&self) -> &str;

    /// Notify every contact; one `Delivery` per contact
    async fn notify(
        &self,
        contacts: &[Contact],
        payload: &AlertPayload,
    ) -> Result<Vec<Delivery>, AlertError>;
}

/// Looks up a user's registered emergency contacts
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contacts(&self, user: &str) -> Result<Vec<Contact>, AlertError>;
}

/// Append-only sink for session events
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, user: &str, event: &Event) -> Result<(), AlertError>;
}

/// Notifier that delivers by structured log line
pub struct LogNotifier;

#[async_trait]
impl ContactNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        contacts: &[Contact],
        payload: &AlertPayload,
    ) -> Result<Vec<Delivery>, AlertError> {
        let message = payload.message();
        Ok(contacts
            .iter()
            .map(|contact| {
                info!(
                    kind = payload.kind.as_str(),
                    contact = %contact.name,
                    phone = %contact.phone,
                    state = %payload.state,
                    "{}",
                    message
                );
                Delivery::sent(contact.clone())
            })
            .collect())
    }
}

/// Contact directory backed by a fixed map (from configuration).
/// User names are matched case-insensitively; configuration keys arrive
/// lowercased.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    contacts: HashMap<String, Vec<Contact>>,
}

impl StaticDirectory {
    pub fn new(contacts: HashMap<String, Vec<Contact>>) -> Self {
        Self {
            contacts: contacts
                .into_iter()
                .map(|(user, list)| (user.to_lowercase(), list))
                .collect(),
        }
    }
}

#[async_trait]
impl ContactDirectory for StaticDirectory {
    async fn contacts(&self, user: &str) -> Result<Vec<Contact>, AlertError> {
        Ok(self
            .contacts
            .get(&user.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// Activity log that writes each event to the tracing pipeline
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(&self, user: &str, event: &Event) -> Result<(), AlertError> {
        if event.is_transition() {
            info!(
                user,
                trigger = event.trigger().as_str(),
                "Threat state {} -> {} (score {:.3})",
                event.previous_state(),
                event.state(),
                event.score()
            );
        }
        Ok(())
    }
}
