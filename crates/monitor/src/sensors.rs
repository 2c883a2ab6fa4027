//! Sensor access for monitoring sessions
//!
//! A `SensorProvider` opens the motion/speech detector pair when a session
//! starts. `FeedRegistry` is the bundled provider: an external capture layer
//! publishes classifier outputs into a per-user `SensorFeed`, and the feed's
//! detectors hand back the latest value while it is fresh.

use async_trait::async_trait;
use chrono::Utc;
use signal_fusion::{Detector, Reading, Signal, SignalSource};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::MonitorError;

/// Detectors for one session
#[derive(Clone)]
pub struct SensorPair {
    pub motion: Arc<dyn Detector>,
    pub speech: Arc<dyn Detector>,
}

impl SensorPair {
    pub fn new(motion: Arc<dyn Detector>, speech: Arc<dyn Detector>) -> Self {
        Self { motion, speech }
    }
}

/// Opens sensors for a user when monitoring starts
#[async_trait]
pub trait SensorProvider: Send + Sync {
    /// Fails with `SensorUnavailable` if the sensors cannot be opened
    async fn open(&self, user: &str) -> Result<SensorPair, MonitorError>;
}

type Slot = Arc<RwLock<Option<Reading>>>;

/// Latest published readings for one user
pub struct SensorFeed {
    motion: Slot,
    speech: Slot,
    max_age: Duration,
}

impl SensorFeed {
    pub fn new(max_age: Duration) -> Self {
        Self {
            motion: Arc::new(RwLock::new(None)),
            speech: Arc::new(RwLock::new(None)),
            max_age,
        }
    }

    fn slot(&self, source: SignalSource) -> &Slot {
        match source {
            SignalSource::Motion => &self.motion,
            SignalSource::Speech => &self.speech,
        }
    }

    /// Publish a classifier value (clamped to [0, 1])
    pub fn publish(&self, source: SignalSource, value: f64) {
        self.store(Reading::Available(Signal::new(source, value)));
    }

    /// Publish a failed read so the next sample reports it
    pub fn publish_failure(&self, source: SignalSource, reason: impl Into<String>) {
        self.store(Reading::unavailable(source, reason));
    }

    fn store(&self, reading: Reading) {
        let mut slot = self
            .slot(reading.source())
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(reading);
    }

    /// Detector reading this feed's slot for `source`
    pub fn detector(&self, source: SignalSource) -> FeedDetector {
        FeedDetector {
            source,
            slot: self.slot(source).clone(),
            max_age: self.max_age,
        }
    }

    pub fn sensors(&self) -> SensorPair {
        SensorPair::new(
            Arc::new(self.detector(SignalSource::Motion)),
            Arc::new(self.detector(SignalSource::Speech)),
        )
    }
}

/// Detector over a feed slot. Stale or missing readings are unavailable.
pub struct FeedDetector {
    source: SignalSource,
    slot: Slot,
    max_age: Duration,
}

impl Detector for FeedDetector {
    fn source(&self) -> SignalSource {
        self.source
    }

    fn sample(&self) -> Reading {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);

        match slot.as_ref() {
            None => Reading::unavailable(self.source, "no reading published"),
            Some(Reading::Available(signal)) => {
                let age = (Utc::now() - signal.captured_at())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age > self.max_age {
                    Reading::unavailable(
                        self.source,
                        format!("stale reading ({} ms old)", age.as_millis()),
                    )
                } else {
                    Reading::Available(*signal)
                }
            }
            Some(unavailable) => unavailable.clone(),
        }
    }
}

/// Per-user feeds, created on first use
pub struct FeedRegistry {
    feeds: RwLock<HashMap<String, Arc<SensorFeed>>>,
    max_age: Duration,
}

impl FeedRegistry {
    pub fn new(max_age: Duration) -> Self {
        info!("Creating sensor feed registry (max reading age {:?})", max_age);
        Self {
            feeds: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    /// Feed for `user`, created if missing
    pub fn feed(&self, user: &str) -> Arc<SensorFeed> {
        if let Some(feed) = self
            .feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
        {
            return feed.clone();
        }

        let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
        feeds
            .entry(user.to_string())
            .or_insert_with(|| {
                debug!("Creating sensor feed for {}", user);
                Arc::new(SensorFeed::new(self.max_age))
            })
            .clone()
    }

    /// Publish a reading for `user`
    pub fn publish(&self, user: &str, source: SignalSource, value: f64) {
        self.feed(user).publish(source, value);
    }

    /// Drop a user's feed (on logout)
    pub fn remove(&self, user: &str) {
        self.feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
    }
}

#[async_trait]
impl SensorProvider for FeedRegistry {
    async fn open(&self, user: &str) -> Result<SensorPair, MonitorError> {
        Ok(self.feed(user).sensors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_without_reading_is_unavailable() {
        let feed = SensorFeed::new(Duration::from_secs(3));
        let reading = feed.detector(SignalSource::Motion).sample();

        assert!(!reading.is_available());
        assert_eq!(reading.source(), SignalSource::Motion);
    }

    #[test]
    fn test_feed_returns_latest_value() {
        let feed = SensorFeed::new(Duration::from_secs(3));
        feed.publish(SignalSource::Speech, 0.3);
        feed.publish(SignalSource::Speech, 0.8);

        let reading = feed.detector(SignalSource::Speech).sample();
        assert_eq!(reading.value(), Some(0.8));
        assert!(!feed.detector(SignalSource::Motion).sample().is_available());
    }

    #[test]
    fn test_stale_reading_is_unavailable() {
        let feed = SensorFeed::new(Duration::ZERO);
        feed.publish(SignalSource::Motion, 0.5);
        std::thread::sleep(Duration::from_millis(5));

        let reading = feed.detector(SignalSource::Motion).sample();
        assert!(matches!(
            reading,
            Reading::Unavailable { ref reason, .. } if reason.starts_with("stale")
        ));
    }

    #[test]
    fn test_published_failure_is_reported() {
        let feed = SensorFeed::new(Duration::from_secs(3));
        feed.publish(SignalSource::Motion, 0.5);
        feed.publish_failure(SignalSource::Motion, "camera released");

        let reading = feed.detector(SignalSource::Motion).sample();
        assert_eq!(
            reading,
            Reading::unavailable(SignalSource::Motion, "camera released")
        );
    }

    #[tokio::test]
    async fn test_registry_shares_feed_with_opened_sensors() {
        let registry = FeedRegistry::new(Duration::from_secs(3));
        let sensors = registry.open("alice").await.unwrap();

        registry.publish("alice", SignalSource::Motion, 0.4);
        registry.publish("bob", SignalSource::Motion, 0.9);

        assert_eq!(sensors.motion.sample().value(), Some(0.4));
    }
}
