use crate::metrics::PublishMetrics;
use crate::types::TelemetryValue;
use bus_transport::MessageBus;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Last payload successfully sent on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub sent_at: Instant,
    pub payload: String,
}

/// Publishes onto a bus, skipping values that were sent unchanged less than half a
/// freshness window ago.
///
/// The cache only ever holds payloads the bus accepted, so a failed send is retried
/// on the next call regardless of its value.
pub struct DedupPublisher {
    bus: Box<dyn MessageBus>,
    freshness_window: Duration,
    cache: HashMap<String, CachedValue>,
    last_publish: Option<(Instant, OffsetDateTime)>,
    metrics: Option<PublishMetrics>,
}

impl DedupPublisher {
    pub fn new(bus: impl MessageBus + 'static, freshness_window: Duration) -> Self {
        Self {
            bus: Box::new(bus),
            freshness_window,
            cache: HashMap::new(),
            last_publish: None,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: PublishMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Devices may report a different value expiry per sample.
    pub fn set_freshness_window(&mut self, window: Duration) {
        self.freshness_window = window;
    }

    /// Send `payload` on `topic` unless it is a fresh duplicate.
    ///
    /// Returns `true` only when the bus accepted the message.
    pub fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if let Some(cached) = self.cache.get(topic) {
            if cached.payload == payload && cached.sent_at.elapsed() < self.freshness_window / 2 {
                debug!("topic {} data not changed", topic);
                if let Some(m) = &self.metrics {
                    m.suppressed.inc();
                }
                return false;
            }
        }

        if let Err(e) = self.bus.publish(topic, payload.as_bytes(), retain) {
            warn!("publish {} failed on {} bus: {}", topic, self.bus.backend(), e);
            if let Some(m) = &self.metrics {
                m.publish_failures.inc();
            }
            return false;
        }

        let now = Instant::now();
        let wall = OffsetDateTime::now_utc();
        self.cache.insert(
            topic.to_string(),
            CachedValue {
                sent_at: now,
                payload: payload.to_string(),
            },
        );
        self.last_publish = Some((now, wall));
        if let Some(m) = &self.metrics {
            m.published.inc();
            m.last_publish_timestamp.set(wall.unix_timestamp() as f64);
        }
        true
    }

    pub fn publish_value(&mut self, topic: &str, value: &TelemetryValue, retain: bool) -> bool {
        self.publish(topic, &value.to_payload(), retain)
    }

    /// Wall-clock time of the last successful publish on any topic.
    pub fn last_publish_time(&self) -> Option<OffsetDateTime> {
        self.last_publish.map(|(_, wall)| wall)
    }

    /// Time elapsed since the last successful publish, on the monotonic clock.
    pub fn since_last_publish(&self) -> Option<Duration> {
        self.last_publish.map(|(at, _)| at.elapsed())
    }

    pub fn cached(&self, topic: &str) -> Option<&CachedValue> {
        self.cache.get(topic)
    }
}
