//! One polling cycle: read the device, publish what it reported.

use crate::descriptors::SAMPLE_DESCRIPTORS;
use crate::device::BmsDevice;
use crate::publisher::DedupPublisher;
use crate::sample::{publish_cell_voltages, publish_sample, publish_temperatures, sample_record};
use crate::walker::TopicTreeWalker;
use anyhow::Context;
use std::time::Duration;

/// How readings are laid out on the bus.
pub enum CycleLayout<'a> {
    /// Descriptor table fields, then cell voltages and temperatures.
    Declarative,
    /// The whole reading as one record through a tree walker.
    PerLeaf(TopicTreeWalker<'a>),
}

pub struct PublishCycle<'a> {
    device_topic: &'a str,
    layout: CycleLayout<'a>,
    min_value_expiry: Duration,
}

impl<'a> PublishCycle<'a> {
    pub fn new(device_topic: &'a str, layout: CycleLayout<'a>) -> Self {
        Self {
            device_topic,
            layout,
            min_value_expiry: Duration::ZERO,
        }
    }

    /// Lower bound for the freshness window, whatever the device reports.
    #[must_use]
    pub fn with_min_value_expiry(mut self, expiry: Duration) -> Self {
        self.min_value_expiry = expiry;
        self
    }

    /// Fetch one reading and publish it. Returns the number of messages sent.
    pub async fn run(
        &self,
        device: &mut dyn BmsDevice,
        publisher: &mut DedupPublisher,
    ) -> anyhow::Result<usize> {
        publisher.set_freshness_window(device.min_value_expiry().max(self.min_value_expiry));

        let sample = device.fetch().await.context("fetching sample")?;
        let voltages = device.fetch_voltages().await.context("fetching cell voltages")?;
        let temperatures = device
            .fetch_temperatures()
            .await
            .context("fetching temperatures")?;

        let sent = match &self.layout {
            CycleLayout::Declarative => {
                publish_sample(publisher, self.device_topic, &sample, SAMPLE_DESCRIPTORS)?
                    + publish_cell_voltages(publisher, self.device_topic, &voltages)
                    + publish_temperatures(publisher, self.device_topic, &temperatures)?
            }
            CycleLayout::PerLeaf(walker) => {
                walker.publish(publisher, &sample_record(&sample, &voltages, &temperatures))?
            }
        };
        Ok(sent)
    }
}
