use crate::descriptors::precision_for;
use crate::discovery::DiscoveryConfigBuilder;
use crate::error::FormatError;
use crate::format::round_to_n;
use crate::publisher::DedupPublisher;
use crate::types::{FieldDescriptor, Record, TelemetryValue};
use tracing::debug;

/// A flattened leaf of a telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Slash-separated path from the record root, starting with `/`.
    pub path: String,
    pub topic: String,
    pub value: TelemetryValue,
}

/// Flatten `record` into topic/value pairs below `device_topic`.
///
/// Nested records are recursed into. Lists are terminal and come out as a JSON
/// array string. Order follows the record's insertion order.
pub fn walk(record: &Record, device_topic: &str, base_path: &str) -> Vec<Leaf> {
    let mut leaves = Vec::new();
    walk_into(record, device_topic, base_path, &mut leaves);
    leaves
}

fn walk_into(record: &Record, device_topic: &str, base_path: &str, out: &mut Vec<Leaf>) {
    for (key, value) in record.iter() {
        let path = format!("{base_path}/{key}");
        match value {
            TelemetryValue::Record(inner) => walk_into(inner, device_topic, &path, out),
            TelemetryValue::List(_) => out.push(Leaf {
                topic: format!("{device_topic}{path}"),
                value: TelemetryValue::Text(value.to_payload()),
                path,
            }),
            _ => out.push(Leaf {
                topic: format!("{device_topic}{path}"),
                value: value.clone(),
                path,
            }),
        }
    }
}

/// Publishes whole records, optionally preceded by per-leaf discovery documents.
pub struct TopicTreeWalker<'a> {
    device_topic: &'a str,
    discovery: Option<DiscoveryConfigBuilder<'a>>,
    precision: Option<&'a [FieldDescriptor]>,
    retain: bool,
}

impl<'a> TopicTreeWalker<'a> {
    pub fn new(device_topic: &'a str) -> Self {
        Self {
            device_topic,
            discovery: None,
            precision: None,
            retain: false,
        }
    }

    /// Send an ad-hoc discovery document (retained) ahead of every value.
    #[must_use]
    pub fn with_discovery(mut self, builder: DiscoveryConfigBuilder<'a>) -> Self {
        self.discovery = Some(builder);
        self
    }

    /// Round numeric leaves before publishing, with the precision of the descriptor
    /// whose key matches the leaf path.
    #[must_use]
    pub fn with_precision(mut self, descriptors: &'a [FieldDescriptor]) -> Self {
        self.precision = Some(descriptors);
        self
    }

    /// Retain flag for value messages. Off by default.
    #[must_use]
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn walk(&self, record: &Record) -> Vec<Leaf> {
        walk(record, self.device_topic, "")
    }

    /// Publish every leaf of `record`. Returns how many value messages were sent.
    ///
    /// A leaf that cannot be rounded stops the walk before anything for it is sent.
    pub fn publish(
        &self,
        publisher: &mut DedupPublisher,
        record: &Record,
    ) -> Result<usize, FormatError> {
        let mut sent = 0;
        for leaf in self.walk(record) {
            let value = match self.precision {
                Some(descriptors) => {
                    round_to_n(&leaf.value, precision_for(&leaf.path, descriptors))?
                }
                None => leaf.value,
            };
            if let Some(builder) = &self.discovery {
                let (topic, payload) = builder.build_discovery(&leaf.path);
                publisher.publish(&topic, &payload, true);
            }
            if publisher.publish_value(&leaf.topic, &value, self.retain) {
                sent += 1;
            }
        }
        debug!("published {} leaves under {}", sent, self.device_topic);
        Ok(sent)
    }
}
