//! Home Assistant MQTT discovery documents.
//!
//! Two styles are supported: [`DiscoveryConfigBuilder::build_discovery`] guesses class and
//! unit for an arbitrary field path from [`CLASS_RULES`], while
//! [`DiscoveryConfigBuilder::build_discovery_all`] works from the static descriptor table
//! plus the device's cell, temperature sensor and switch counts.

use crate::descriptors::{cell_voltage_key, temperature_key};
use crate::format::remove_none_values;
use crate::topics::{
    sensor_config_topic, slug, switch_command_topic, switch_config_topic, switch_state_topic,
    value_topic, Component,
};
use crate::types::{DeviceClass, DeviceInfo, FieldDescriptor};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const ICON_SCHEME: &str = "mdi:";

/// A test applied to a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    Contains(&'static str),
    EndsWith(&'static str),
}

impl PathMatch {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Contains(s) => path.contains(s),
            PathMatch::EndsWith(s) => path.ends_with(s),
        }
    }
}

/// Class and unit assigned to paths matching any of `any_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRule {
    pub any_of: &'static [PathMatch],
    pub class: Option<DeviceClass>,
    pub unit: &'static str,
}

/// Heuristic rules, evaluated in order; the first match wins.
pub const CLASS_RULES: &[ClassRule] = &[
    ClassRule {
        any_of: &[PathMatch::Contains("soc_percent"), PathMatch::EndsWith("/soc")],
        class: Some(DeviceClass::Battery),
        unit: "%",
    },
    ClassRule {
        any_of: &[PathMatch::Contains("voltage")],
        class: Some(DeviceClass::Voltage),
        unit: "V",
    },
    ClassRule {
        any_of: &[PathMatch::Contains("current")],
        class: Some(DeviceClass::Current),
        unit: "A",
    },
    ClassRule {
        any_of: &[PathMatch::Contains("power")],
        class: Some(DeviceClass::Power),
        unit: "W",
    },
    ClassRule {
        any_of: &[PathMatch::Contains("capacity"), PathMatch::EndsWith("/charge")],
        class: None,
        unit: "Ah",
    },
    ClassRule {
        any_of: &[PathMatch::Contains("temperatures")],
        class: Some(DeviceClass::Temperature),
        unit: "°C",
    },
];

pub fn classify(path: &str) -> Option<&'static ClassRule> {
    CLASS_RULES
        .iter()
        .find(|rule| rule.any_of.iter().any(|m| m.matches(path)))
}

/// One entry of a discovery set.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEntry {
    /// A retained JSON config document.
    Config(Map<String, Value>),
    /// The state topic a declared switch publishes `ON`/`OFF` on. Nothing is sent here
    /// at discovery time; its state comes with each sample.
    SwitchState { switch: String },
}

impl DiscoveryEntry {
    pub fn as_config(&self) -> Option<&Map<String, Value>> {
        match self {
            DiscoveryEntry::Config(doc) => Some(doc),
            DiscoveryEntry::SwitchState { .. } => None,
        }
    }

    /// Serialized config document, `None` for state topics.
    pub fn payload(&self) -> Option<String> {
        self.as_config()
            .map(|doc| Value::Object(doc.clone()).to_string())
    }
}

pub type DiscoverySet = BTreeMap<String, DiscoveryEntry>;

struct SensorSpec<'a> {
    key: &'a str,
    class: Option<DeviceClass>,
    unit: Option<&'a str>,
    icon: Option<&'a str>,
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Builds discovery documents for one device namespace.
#[derive(Debug, Clone)]
pub struct DiscoveryConfigBuilder<'a> {
    device_topic: &'a str,
    device: Map<String, Value>,
    expire_after: Option<u64>,
}

impl<'a> DiscoveryConfigBuilder<'a> {
    pub fn new(device_topic: &'a str) -> Self {
        let mut builder = Self {
            device_topic,
            device: Map::new(),
            expire_after: None,
        };
        builder.set_device_info(&DeviceInfo::default());
        builder
    }

    #[must_use]
    pub fn with_device_info(mut self, info: &DeviceInfo) -> Self {
        self.set_device_info(info);
        self
    }

    /// Seconds after which Home Assistant marks a sensor unavailable.
    #[must_use]
    pub fn with_expire_after(mut self, seconds: u64) -> Self {
        self.expire_after = Some(seconds);
        self
    }

    fn set_device_info(&mut self, info: &DeviceInfo) {
        let identifier = non_empty(&info.sn).unwrap_or_else(|| self.device_topic.to_string());
        let name = non_empty(&info.name).unwrap_or_else(|| self.device_topic.to_string());
        let mut device = Map::new();
        device.insert("identifiers".into(), Value::from(vec![identifier]));
        device.insert("name".into(), Value::from(name));
        device.insert("model".into(), info.model.clone().into());
        device.insert("sw_version".into(), info.sw_version.clone().into());
        device.insert("hw_version".into(), info.hw_version.clone().into());
        remove_none_values(&mut device);
        self.device = device;
    }

    pub fn device_topic(&self) -> &str {
        self.device_topic
    }

    /// Ad-hoc document for an arbitrary leaf, class and unit guessed from the path.
    ///
    /// Returns the config topic and its JSON payload.
    pub fn build_discovery(&self, field_path: &str) -> (String, String) {
        let rule = classify(field_path);
        let doc = self.sensor_document(&SensorSpec {
            key: field_path,
            class: rule.and_then(|r| r.class),
            unit: rule.map(|r| r.unit),
            icon: None,
        });
        (
            sensor_config_topic(self.device_topic, field_path),
            Value::Object(doc).to_string(),
        )
    }

    /// Every document for a device: one per descriptor, per cell and per temperature
    /// sensor, plus three entries per switch.
    pub fn build_discovery_all<S: AsRef<str>>(
        &self,
        descriptors: &[FieldDescriptor],
        cell_count: usize,
        temp_sensor_count: usize,
        switches: &[S],
    ) -> DiscoverySet {
        let mut set = DiscoverySet::new();

        for d in descriptors {
            let doc = self.sensor_document(&SensorSpec {
                key: d.key,
                class: d.class,
                unit: d.unit,
                icon: d.icon,
            });
            insert_unique(&mut set, sensor_config_topic(self.device_topic, d.key), doc);
        }

        for i in 1..=cell_count {
            let key = cell_voltage_key(i);
            let doc = self.sensor_document(&SensorSpec {
                key: &key,
                class: Some(DeviceClass::Voltage),
                unit: Some("V"),
                icon: None,
            });
            insert_unique(&mut set, sensor_config_topic(self.device_topic, &key), doc);
        }

        for i in 1..=temp_sensor_count {
            let key = temperature_key(i);
            let doc = self.sensor_document(&SensorSpec {
                key: &key,
                class: Some(DeviceClass::Temperature),
                unit: Some("°C"),
                icon: None,
            });
            insert_unique(&mut set, sensor_config_topic(self.device_topic, &key), doc);
        }

        for name in switches {
            let name = name.as_ref();
            for component in [Component::Switch, Component::BinarySensor] {
                insert_unique(
                    &mut set,
                    switch_config_topic(component, self.device_topic, name),
                    self.switch_document(component, name),
                );
            }
            set.insert(
                switch_state_topic(self.device_topic, name),
                DiscoveryEntry::SwitchState {
                    switch: name.to_string(),
                },
            );
        }

        set
    }

    fn sensor_document(&self, sensor: &SensorSpec<'_>) -> Map<String, Value> {
        let key = sensor.key.trim_start_matches('/');
        let topic = value_topic(self.device_topic, key);
        let mut doc = Map::new();
        doc.insert(
            "unique_id".into(),
            format!("{}_{}", self.device_topic, slug(key)).into(),
        );
        doc.insert(
            "name".into(),
            format!("{} {}", self.device_topic, key.replace('/', " ")).into(),
        );
        doc.insert(
            "device_class".into(),
            sensor.class.map(|c| c.as_str()).into(),
        );
        doc.insert("unit_of_measurement".into(), sensor.unit.into());
        doc.insert(
            "icon".into(),
            sensor.icon.map(|i| format!("{ICON_SCHEME}{i}")).into(),
        );
        doc.insert("json_attributes_topic".into(), topic.clone().into());
        doc.insert("state_topic".into(), topic.into());
        doc.insert("expire_after".into(), self.expire_after.into());
        doc.insert("device".into(), Value::Object(self.device.clone()));
        remove_none_values(&mut doc);
        doc
    }

    fn switch_document(&self, component: Component, name: &str) -> Map<String, Value> {
        let state_topic = switch_state_topic(self.device_topic, name);
        let mut doc = Map::new();
        doc.insert(
            "unique_id".into(),
            format!("{}__{}_{}", self.device_topic, component.as_str(), name).into(),
        );
        doc.insert("name".into(), format!("{} {}", self.device_topic, name).into());
        doc.insert("device_class".into(), DeviceClass::Outlet.as_str().into());
        doc.insert("json_attributes_topic".into(), state_topic.clone().into());
        doc.insert("state_topic".into(), state_topic.into());
        if component == Component::Switch {
            doc.insert(
                "command_topic".into(),
                switch_command_topic(self.device_topic, name).into(),
            );
        }
        doc.insert("device".into(), Value::Object(self.device.clone()));
        remove_none_values(&mut doc);
        doc
    }
}

fn insert_unique(set: &mut DiscoverySet, topic: String, doc: Map<String, Value>) {
    if set.contains_key(&topic) {
        warn!("discovery topic {} produced twice, keeping the first", topic);
        return;
    }
    set.insert(topic, DiscoveryEntry::Config(doc));
}

/// Declarative discovery for a whole device in one call.
pub fn build_discovery_all<S: AsRef<str>>(
    device_topic: &str,
    descriptors: &[FieldDescriptor],
    cell_count: usize,
    temp_sensor_count: usize,
    expire_after_seconds: u64,
    device_info: Option<&DeviceInfo>,
    switches: &[S],
) -> DiscoverySet {
    let mut builder = DiscoveryConfigBuilder::new(device_topic).with_expire_after(expire_after_seconds);
    if let Some(info) = device_info {
        builder = builder.with_device_info(info);
    }
    builder.build_discovery_all(descriptors, cell_count, temp_sensor_count, switches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::SAMPLE_DESCRIPTORS;
    use serde_json::json;

    fn info() -> DeviceInfo {
        DeviceInfo {
            sn: Some("SN123".into()),
            name: Some("Garage Battery".into()),
            model: Some("SP04S020".into()),
            sw_version: Some(String::new()),
            hw_version: None,
        }
    }

    #[test]
    fn rules_classify_in_priority_order() {
        let class = |p: &str| classify(p).and_then(|r| r.class);
        let unit = |p: &str| classify(p).map(|r| r.unit);
        assert_eq!(class("/soc/soc_percent"), Some(DeviceClass::Battery));
        assert_eq!(class("/status/soc"), Some(DeviceClass::Battery));
        assert_eq!(class("/soc/total_voltage"), Some(DeviceClass::Voltage));
        assert_eq!(class("/soc/balance_current"), Some(DeviceClass::Current));
        assert_eq!(class("/soc/power"), Some(DeviceClass::Power));
        assert_eq!(unit("/soc/capacity"), Some("Ah"));
        assert_eq!(class("/soc/capacity"), None);
        assert_eq!(unit("/mosfet_status/charge"), Some("Ah"));
        assert_eq!(unit("/temperatures/1"), Some("°C"));
        assert!(classify("/status/cycles").is_none());
    }

    #[test]
    fn ad_hoc_document_for_cell_voltage() {
        let builder = DiscoveryConfigBuilder::new("daly_bms");
        let (topic, payload) = builder.build_discovery("/cell_voltages/1");
        assert_eq!(topic, "homeassistant/sensor/daly_bms/_cell_voltages_1/config");
        let doc: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            doc,
            json!({
                "unique_id": "daly_bms__cell_voltages_1",
                "name": "daly_bms cell_voltages 1",
                "device_class": "voltage",
                "unit_of_measurement": "V",
                "json_attributes_topic": "daly_bms/cell_voltages/1",
                "state_topic": "daly_bms/cell_voltages/1",
                "device": { "identifiers": ["daly_bms"], "name": "daly_bms" },
            })
        );
    }

    #[test]
    fn ad_hoc_document_without_class_omits_class_and_unit() {
        let builder = DiscoveryConfigBuilder::new("daly_bms");
        let (_, payload) = builder.build_discovery("/status/cycles");
        let doc: Value = serde_json::from_str(&payload).unwrap();
        assert!(doc.get("device_class").is_none());
        assert!(doc.get("unit_of_measurement").is_none());
    }

    #[test]
    fn declarative_documents_carry_icon_expiry_and_device_block() {
        let set = build_discovery_all("jbd", SAMPLE_DESCRIPTORS, 0, 0, 60, Some(&info()), &[] as &[&str]);
        assert_eq!(set.len(), SAMPLE_DESCRIPTORS.len());

        let voltage = set["homeassistant/sensor/jbd/_soc_total_voltage/config"]
            .as_config()
            .unwrap();
        assert_eq!(voltage["icon"], "mdi:meter-electric");
        assert_eq!(voltage["expire_after"], 60);
        assert_eq!(voltage["state_topic"], "jbd/soc/total_voltage");
        assert_eq!(
            voltage["device"],
            json!({ "identifiers": ["SN123"], "name": "Garage Battery", "model": "SP04S020" })
        );

        let capacity = set["homeassistant/sensor/jbd/_soc_capacity/config"]
            .as_config()
            .unwrap();
        assert!(capacity.get("device_class").is_none());
        assert!(capacity.get("icon").is_none());
        assert_eq!(capacity["unit_of_measurement"], "Ah");
    }

    #[test]
    fn one_voltage_document_per_cell() {
        let set = build_discovery_all("jbd", &[], 8, 2, 60, None, &[] as &[&str]);
        let cells: Vec<_> = set
            .iter()
            .filter(|(topic, _)| topic.contains("_cell_voltages_"))
            .collect();
        assert_eq!(cells.len(), 8);
        for (_, entry) in cells {
            assert_eq!(entry.as_config().unwrap()["unit_of_measurement"], "V");
        }
        assert!(set.contains_key("homeassistant/sensor/jbd/_temperatures_2/config"));
        assert!(!set.contains_key("homeassistant/sensor/jbd/_temperatures_3/config"));
    }

    #[test]
    fn switch_yields_three_topics() {
        let set = build_discovery_all("jbd", &[], 0, 0, 60, None, &["foo"]);
        let topics: Vec<&str> = set.keys().map(String::as_str).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/binary_sensor/jbd/foo/config",
                "homeassistant/switch/jbd/foo/config",
                "jbd/switch/foo",
            ]
        );

        let switch = set["homeassistant/switch/jbd/foo/config"].as_config().unwrap();
        assert_eq!(switch["command_topic"], "homeassistant/switch/jbd/foo/set");
        assert_eq!(switch["state_topic"], "jbd/switch/foo");
        assert_eq!(switch["device_class"], "outlet");
        assert!(switch.get("expire_after").is_none());

        let binary = set["homeassistant/binary_sensor/jbd/foo/config"].as_config().unwrap();
        assert!(binary.get("command_topic").is_none());
        assert_eq!(binary["state_topic"], "jbd/switch/foo");
        assert_ne!(binary["unique_id"], switch["unique_id"]);

        assert_eq!(
            set["jbd/switch/foo"],
            DiscoveryEntry::SwitchState {
                switch: "foo".into()
            }
        );
        assert!(set["jbd/switch/foo"].payload().is_none());
    }

    #[test]
    fn repeated_builds_are_identical() {
        let build = || {
            build_discovery_all(
                "jbd",
                SAMPLE_DESCRIPTORS,
                4,
                2,
                60,
                Some(&info()),
                &["charge", "discharge"],
            )
        };
        let a = build();
        let b = build();
        assert_eq!(a, b);
        let payloads = |s: &DiscoverySet| -> Vec<Option<String>> {
            s.values().map(DiscoveryEntry::payload).collect()
        };
        assert_eq!(payloads(&a), payloads(&b));
    }
}
