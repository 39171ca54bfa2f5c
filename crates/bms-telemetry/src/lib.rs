//! bms-telemetry: battery monitor telemetry over a publish/subscribe bus
//!
//! Values are rounded, deduplicated and published below a device topic; Home
//! Assistant discovery documents describe them; switch commands arriving on the bus
//! are queued and applied to the device one at a time.

use std::time::Duration;

/// Default freshness window of published values.
pub const MIN_VALUE_EXPIRY: Duration = Duration::from_secs(20);

mod types;
pub use types::{
    switch_payload, DeviceClass, DeviceInfo, FieldDescriptor, Record, SampleField,
    TelemetrySample, TelemetryValue,
};

mod error;
pub use error::{DispatchError, FormatError};

pub mod format;
pub use format::{remove_none_values, round_to_n};

mod metrics;
pub use metrics::{CommandMetrics, MetricsHub, PublishMetrics};

mod publisher;
pub use publisher::{CachedValue, DedupPublisher};

pub mod topics;

pub mod descriptors;
pub use descriptors::SAMPLE_DESCRIPTORS;

pub mod discovery;
pub use discovery::{build_discovery_all, DiscoveryConfigBuilder, DiscoveryEntry, DiscoverySet};

mod walker;
pub use walker::{walk, Leaf, TopicTreeWalker};

mod sample;
pub use sample::{
    publish_cell_voltages, publish_discovery, publish_sample, publish_temperatures, sample_record,
};

mod device;
pub use device::BmsDevice;

#[cfg(feature = "mock")]
pub use device::MockBms;

mod cycle;
pub use cycle::{CycleLayout, PublishCycle};

mod commands;
pub use commands::{
    command_queue, parse_switch_payload, subscribe_switches, Command, CommandDispatcher,
    CommandRoute, CommandSender, DrainReport, SubscriptionTable,
};

pub mod config;
pub use config::{load_config, DiscoveryMode, MockConfig, MqttConfig, PublisherConfig};
