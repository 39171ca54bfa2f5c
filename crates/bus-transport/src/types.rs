use core::fmt;
use time::OffsetDateTime;

use crate::{Result, TransportError};

/// Delivery guarantee requested for a subscription or publish.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos{}", self.level())
    }
}

/// A message delivered by the bus for a subscribed topic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: Option<Timestamp>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Some(Timestamp(OffsetDateTime::now_utc())),
        }
    }
}

/// A message accepted by a backend for sending.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload as UTF-8 text, lossy.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

/// Reject topics that cannot be published to: empty, wildcard or NUL-bearing names.
pub(crate) fn validate_publish_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(TransportError::InvalidTopic("empty topic".to_string()));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(TransportError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}
