use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct PublishMetrics {
    pub published: IntCounter,
    pub suppressed: IntCounter,
    pub publish_failures: IntCounter,
    pub last_publish_timestamp: Gauge,
}

#[derive(Clone)]
pub struct CommandMetrics {
    pub commands: IntCounter,
    pub command_failures: IntCounter,
    pub unroutable: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub publish: PublishMetrics,
    pub command: CommandMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let publish = PublishMetrics {
            published: counter("bms_mqtt_published_total", "Messages accepted by the bus")?,
            suppressed: counter(
                "bms_mqtt_suppressed_total",
                "Publishes skipped because the value was unchanged and fresh",
            )?,
            publish_failures: counter(
                "bms_mqtt_publish_failures_total",
                "Publishes rejected by the bus",
            )?,
            last_publish_timestamp: Gauge::new(
                "bms_mqtt_last_publish_timestamp_seconds",
                "Unix time of the last successful publish",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let command = CommandMetrics {
            commands: counter("bms_mqtt_commands_total", "Switch commands executed")?,
            command_failures: counter(
                "bms_mqtt_command_failures_total",
                "Switch commands that failed on the device",
            )?,
            unroutable: counter(
                "bms_mqtt_unroutable_total",
                "Inbound messages that matched no command",
            )?,
        };
        let collectors: [Box<dyn Collector>; 7] = [
            Box::new(publish.published.clone()),
            Box::new(publish.suppressed.clone()),
            Box::new(publish.publish_failures.clone()),
            Box::new(publish.last_publish_timestamp.clone()),
            Box::new(command.commands.clone()),
            Box::new(command.command_failures.clone()),
            Box::new(command.unroutable.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| format!("metrics init error: {e}"))?;
        }
        Ok(Self {
            registry,
            publish,
            command,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
