//! bus-transport: publish/subscribe message bus abstractions
//!
//! This crate provides the trait and types the telemetry publisher uses to talk to a
//! message bus, with feature-gated backends. The default build enables a `mock` backend
//! so that binaries and tests run on any host without a broker.

mod types;
pub use types::{InboundMessage, PublishedMessage, QoS, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{InboundHandler, MessageBus};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockBus;

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttSettings};
