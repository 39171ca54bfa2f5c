use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How discovery documents are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// One document per descriptor, cell and temperature slot, sent once at startup.
    #[default]
    Declarative,
    /// A document ahead of every leaf of the sample record, on every cycle.
    PerLeaf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "bms-mqtt".into(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            channel_capacity: 64,
        }
    }
}

/// Layout of the simulated battery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub cell_count: usize,
    pub temp_sensor_count: usize,
    pub switches: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            cell_count: 8,
            temp_sensor_count: 2,
            switches: vec!["charge".into(), "discharge".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub device_topic: String,
    pub sample_period_secs: u64,
    pub min_value_expiry_secs: u64,
    pub expire_after_secs: Option<u64>,
    pub discovery: bool,
    pub discovery_mode: DiscoveryMode,
    /// Switches to expose. Empty means whatever the device reports.
    pub switches: Vec<String>,
    pub mqtt: MqttConfig,
    pub mock: MockConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            device_topic: "bms".into(),
            sample_period_secs: 5,
            min_value_expiry_secs: crate::MIN_VALUE_EXPIRY.as_secs(),
            expire_after_secs: None,
            discovery: true,
            discovery_mode: DiscoveryMode::default(),
            switches: Vec::new(),
            mqtt: MqttConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

impl PublisherConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs(self.sample_period_secs.max(1))
    }

    pub fn min_value_expiry(&self) -> Duration {
        Duration::from_secs(self.min_value_expiry_secs)
    }

    /// `expire_after` hint for discovery documents: explicit value, or two sample
    /// periods but never less than the minimum value expiry.
    pub fn expire_after(&self) -> u64 {
        self.expire_after_secs
            .unwrap_or_else(|| (2 * self.sample_period().as_secs()).max(self.min_value_expiry_secs))
    }

    /// Configured switches, falling back to the ones the device reports.
    pub fn switches_or(&self, device_switches: Vec<String>) -> Vec<String> {
        if self.switches.is_empty() {
            device_switches
        } else {
            self.switches.clone()
        }
    }
}

pub fn parse_config(raw: &str) -> anyhow::Result<PublisherConfig> {
    if raw.trim().is_empty() {
        return Ok(PublisherConfig::default());
    }
    serde_yaml::from_str(raw).context("decoding publisher config")
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<PublisherConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("parsing yaml: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, PublisherConfig::default());
        assert_eq!(cfg.device_topic, "bms");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mock.cell_count, 8);
        // 2 * 5s is below the 20s minimum expiry
        assert_eq!(cfg.expire_after(), 20);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let cfg = parse_config(
            "device_topic: garage_bms\n\
             sample_period_secs: 30\n\
             discovery_mode: per_leaf\n\
             mqtt:\n  host: broker.lan\n",
        )
        .unwrap();
        assert_eq!(cfg.device_topic, "garage_bms");
        assert_eq!(cfg.discovery_mode, DiscoveryMode::PerLeaf);
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.keep_alive_secs, 30);
        assert_eq!(cfg.expire_after(), 60);
    }

    #[test]
    fn explicit_expiry_wins() {
        let cfg = parse_config("expire_after_secs: 7\n").unwrap();
        assert_eq!(cfg.expire_after(), 7);
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(parse_config("discovery_mode: sometimes\n").is_err());
    }

    #[test]
    fn switches_fall_back_to_device() {
        let cfg = PublisherConfig::default();
        assert_eq!(cfg.switches_or(vec!["charge".into()]), vec!["charge".to_string()]);
        let cfg = parse_config("switches: [heater]\n").unwrap();
        assert_eq!(cfg.switches_or(vec!["charge".into()]), vec!["heater".to_string()]);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/nonexistent/bms.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/bms.yaml"));
    }
}
