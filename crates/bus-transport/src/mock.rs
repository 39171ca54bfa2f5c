use crate::types::validate_publish_topic;
use crate::{InboundHandler, InboundMessage, MessageBus, PublishedMessage, QoS, Result, TransportError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

type SharedHandler = Arc<dyn Fn(InboundMessage) + Send + Sync + 'static>;

#[derive(Default)]
struct Inner {
    offline: bool,
    rejected: HashSet<String>,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<(String, QoS)>,
    handler: Option<SharedHandler>,
}

/// A simple in-process mock bus. Clones share the same state, so a test can keep
/// one handle for inspection while the publisher owns another.
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Arc<Mutex<Inner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every publish fails with `NotConnected`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make publishes to `topic` fail until [`MockBus::accept_topic`] is called.
    pub fn reject_topic(&self, topic: impl Into<String>) {
        self.inner.lock().rejected.insert(topic.into());
    }

    pub fn accept_topic(&self, topic: &str) {
        self.inner.lock().rejected.remove(topic);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Payload of the most recent publish on `topic`.
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.inner
            .lock()
            .published
            .iter()
            .rev()
            .find(|m| m.topic == topic)
            .map(PublishedMessage::payload_str)
    }

    pub fn publish_count(&self) -> usize {
        self.inner.lock().published.len()
    }

    pub fn clear_published(&self) {
        self.inner.lock().published.clear();
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.inner.lock().subscriptions.clone()
    }

    pub fn set_inbound_handler(&self, handler: InboundHandler) {
        self.inner.lock().handler = Some(Arc::from(handler));
    }

    /// Deliver a message to the inbound handler, as the broker would.
    ///
    /// Delivery does not check subscriptions. Returns `false` when no handler is set.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let handler = self.inner.lock().handler.clone();
        match handler {
            Some(handler) => {
                handler(InboundMessage::new(topic, payload));
                true
            }
            None => false,
        }
    }
}

impl MessageBus for MockBus {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        validate_publish_topic(topic)?;
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(TransportError::NotConnected);
        }
        if inner.rejected.contains(topic) {
            return Err(TransportError::Rejected(format!("mock rejects {topic}")));
        }
        inner.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic("empty topic".to_string()));
        }
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(TransportError::NotConnected);
        }
        inner.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}
