//! Alerting System
//!
//! Provides edge-triggered escalation alerts, SOS dispatch, and the
//! outbound collaborators (contact directory, notifier, activity log).

mod dispatcher;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod notifier;
mod trigger;

pub use dispatcher::{AlertConfig, AlertDispatcher, DispatchReport, NotificationRecord};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryActivityLog, MemoryNotifier};
pub use notifier::{
    ActivityLog, AlertKind, AlertPayload, Contact, ContactDirectory, ContactNotifier, Delivery,
    DeliveryStatus, Location, LogNotifier, StaticDirectory, TracingActivityLog,
};
pub use trigger::EscalationTrigger;

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("Contact directory unavailable: {0}")]
    Directory(String),

    #[error("Notifier failed: {0}")]
    Notifier(String),

    #[error("All {attempted} deliveries failed")]
    AllDeliveriesFailed { attempted: usize },

    #[error("Activity log failed: {0}")]
    ActivityLog(String),
}
