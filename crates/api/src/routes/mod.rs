//! API Routes

pub mod monitoring;
pub mod notifications;
pub mod readings;
