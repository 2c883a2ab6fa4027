//! Monitoring configuration
//!
//! Loaded once at startup: built-in defaults, then an optional TOML file,
//! then `SAFEWATCH__*` environment variables (`__` separates sections, e.g.
//! `SAFEWATCH__SESSION__TICK_INTERVAL_MS=500`).

use alerting::{AlertConfig, Contact};
use serde::{Deserialize, Serialize};
use signal_fusion::FusionConfig;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use threat_state::StateConfig;
use tracing::info;

use crate::MonitorError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SAFEWATCH";

/// Per-session loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tick cadence in milliseconds (default: 1000)
    pub tick_interval_ms: u64,
    /// Auto-alert flag for new sessions (default: true)
    pub auto_alert: bool,
    /// Events kept per session (default: 100)
    pub history_capacity: usize,
    /// Events included in a status snapshot (default: 20)
    pub status_history: usize,
    /// Feed readings older than this are unavailable (default: 3000)
    pub reading_max_age_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            auto_alert: true,
            history_capacity: 100,
            status_history: 20,
            reading_max_age_ms: 3000,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reading_max_age(&self) -> Duration {
        Duration::from_millis(self.reading_max_age_ms)
    }
}

/// Complete monitoring configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub fusion: FusionConfig,
    pub states: StateConfig,
    pub session: SessionConfig,
    pub alerting: AlertConfig,
    /// Emergency contacts by user, for deployments without an account store
    pub contacts: HashMap<String, Vec<Contact>>,
}

impl MonitorConfig {
    /// Load defaults, optional file, and environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, MonitorError> {
        let settings = load_settings(path)?;
        Self::from_settings(&settings)
    }

    /// Deserialize and validate from already-built settings
    pub fn from_settings(settings: &::config::Config) -> Result<Self, MonitorError> {
        let config: Self = settings.clone().try_deserialize()?;
        config.validate()?;
        info!(
            "Loaded monitoring config: tick {} ms, weights motion {} / speech {}, alpha {}",
            config.session.tick_interval_ms,
            config.fusion.motion_weight,
            config.fusion.speech_weight,
            config.fusion.smoothing
        );
        Ok(config)
    }

    /// Reject configurations the monitor must not start with
    pub fn validate(&self) -> Result<(), MonitorError> {
        self.fusion.validate()?;
        self.states.validate()?;

        if self.session.tick_interval_ms == 0 {
            return Err(MonitorError::ConfigInvalid(
                "session.tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.session.history_capacity == 0 {
            return Err(MonitorError::ConfigInvalid(
                "session.history_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Layered settings source shared by the monitor and the server binary
pub fn load_settings(path: Option<&Path>) -> Result<::config::Config, MonitorError> {
    let mut builder = ::config::Config::builder();

    if let Some(path) = path {
        info!("Reading configuration from {}", path.display());
        builder = builder.add_source(::config::File::from(path));
    }

    let settings = builder
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings)
}
