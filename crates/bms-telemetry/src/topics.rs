//! Topic naming. Every topic is a pure function of the device topic and a field path.

pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Home Assistant entity platform a discovery document registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Sensor,
    Switch,
    BinarySensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::Switch => "switch",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

fn trim(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Topic a value is published on: `D/P`.
pub fn value_topic(device_topic: &str, path: &str) -> String {
    format!("{device_topic}/{}", trim(path))
}

/// Flat identifier for a field path: `soc/current` becomes `_soc_current`.
pub fn slug(path: &str) -> String {
    format!("_{}", trim(path).replace('/', "_"))
}

/// `homeassistant/sensor/D/<slug>/config`
pub fn sensor_config_topic(device_topic: &str, path: &str) -> String {
    format!(
        "{DISCOVERY_PREFIX}/{}/{device_topic}/{}/config",
        Component::Sensor.as_str(),
        slug(path)
    )
}

/// `homeassistant/<switch|binary_sensor>/D/<name>/config`
pub fn switch_config_topic(component: Component, device_topic: &str, name: &str) -> String {
    format!("{DISCOVERY_PREFIX}/{}/{device_topic}/{name}/config", component.as_str())
}

/// Inbound command topic of a switch: `homeassistant/switch/D/<name>/set`.
pub fn switch_command_topic(device_topic: &str, name: &str) -> String {
    format!(
        "{DISCOVERY_PREFIX}/{}/{device_topic}/{name}/set",
        Component::Switch.as_str()
    )
}

/// State topic of a switch: `D/switch/<name>`.
pub fn switch_state_topic(device_topic: &str, name: &str) -> String {
    format!("{device_topic}/switch/{name}")
}
