use crate::{InboundMessage, QoS, Result};

/// Callback invoked from the backend's own delivery context for every inbound message.
///
/// Handlers must not block: they run on the transport's thread or task.
pub type InboundHandler = Box<dyn Fn(InboundMessage) + Send + Sync + 'static>;

/// A minimal non-blocking publish/subscribe bus.
pub trait MessageBus: Send + Sync {
    /// Queue one message for sending. Returns immediately; an `Err` is the backend's
    /// non-success result code.
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;

    /// Subscribe to a topic filter.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;

    /// Human-readable backend name for logs.
    fn backend(&self) -> &'static str {
        "unknown"
    }
}

impl<T: MessageBus + ?Sized> MessageBus for Box<T> {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        (**self).publish(topic, payload, retain)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        (**self).subscribe(topic, qos)
    }

    fn backend(&self) -> &'static str {
        (**self).backend()
    }
}

impl<T: MessageBus + ?Sized> MessageBus for std::sync::Arc<T> {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        (**self).publish(topic, payload, retain)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        (**self).subscribe(topic, qos)
    }

    fn backend(&self) -> &'static str {
        (**self).backend()
    }
}
