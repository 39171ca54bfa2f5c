use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single telemetry leaf value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    F64(f64),
    I64(i64),
    Bool(bool),
    Text(String),
    List(Vec<TelemetryValue>),
    Record(Record),
}

impl TelemetryValue {
    /// Render the value as a bus payload. Lists become JSON arrays.
    pub fn to_payload(&self) -> String {
        match self {
            TelemetryValue::F64(v) => v.to_string(),
            TelemetryValue::I64(v) => v.to_string(),
            TelemetryValue::Bool(v) => v.to_string(),
            TelemetryValue::Text(v) => v.clone(),
            TelemetryValue::List(_) | TelemetryValue::Record(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_payload())
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::F64(v)
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::I64(v)
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Bool(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

impl From<Record> for TelemetryValue {
    fn from(v: Record) -> Self {
        TelemetryValue::Record(v)
    }
}

/// Nested telemetry record that keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, TelemetryValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TelemetryValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TelemetryValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TelemetryValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Home Assistant device class of a sensor or switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Voltage,
    Current,
    Power,
    Temperature,
    Battery,
    Outlet,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Voltage => "voltage",
            DeviceClass::Current => "current",
            DeviceClass::Power => "power",
            DeviceClass::Temperature => "temperature",
            DeviceClass::Battery => "battery",
            DeviceClass::Outlet => "outlet",
        }
    }
}

/// Sample fields that a descriptor can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleField {
    Voltage,
    Current,
    BalanceCurrent,
    Soc,
    Power,
    Capacity,
    CycleCapacity,
    Charge,
    MosTemperature,
}

/// Static publication metadata for one sample field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    /// Dotted field path below the device topic, e.g. `soc/current`.
    pub key: &'static str,
    pub field: SampleField,
    pub class: Option<DeviceClass>,
    pub unit: Option<&'static str>,
    /// Significant digits used when rounding.
    pub precision: u32,
    /// Material Design icon name without the `mdi:` prefix.
    pub icon: Option<&'static str>,
}

/// One reading cycle as reported by the device driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetrySample {
    pub voltage: f64,
    pub current: f64,
    pub balance_current: Option<f64>,
    /// State of charge in percent.
    pub soc: f64,
    /// Reported power; derived from voltage and current when absent.
    pub power: Option<f64>,
    pub capacity: Option<f64>,
    pub cycle_capacity: Option<f64>,
    pub charge: Option<f64>,
    pub mos_temperature: Option<f64>,
    pub switches: BTreeMap<String, bool>,
}

impl TelemetrySample {
    pub fn power(&self) -> f64 {
        self.power.unwrap_or(self.voltage * self.current)
    }

    pub fn field(&self, field: SampleField) -> Option<f64> {
        match field {
            SampleField::Voltage => Some(self.voltage),
            SampleField::Current => Some(self.current),
            SampleField::BalanceCurrent => self.balance_current,
            SampleField::Soc => Some(self.soc),
            SampleField::Power => Some(self.power()),
            SampleField::Capacity => self.capacity,
            SampleField::CycleCapacity => self.cycle_capacity,
            SampleField::Charge => self.charge,
            SampleField::MosTemperature => self.mos_temperature,
        }
    }

    /// Nested record of this sample, laid out like the descriptor table keys.
    pub fn to_record(&self) -> Record {
        let mut soc = Record::new()
            .with("total_voltage", self.voltage)
            .with("current", self.current);
        if let Some(v) = self.balance_current {
            soc.insert("balance_current", v);
        }
        soc.insert("soc_percent", self.soc);
        soc.insert("power", self.power());
        if let Some(v) = self.capacity {
            soc.insert("capacity", v);
        }
        if let Some(v) = self.cycle_capacity {
            soc.insert("cycle_capacity", v);
        }

        let mut mosfet = Record::new();
        if let Some(v) = self.charge {
            mosfet.insert("capacity_ah", v);
        }
        if let Some(v) = self.mos_temperature {
            mosfet.insert("temperature", v);
        }

        let mut record = Record::new().with("soc", soc);
        if !mosfet.is_empty() {
            record.insert("mosfet_status", mosfet);
        }
        if !self.switches.is_empty() {
            let mut switches = Record::new();
            for (name, on) in &self.switches {
                switches.insert(name.clone(), switch_payload(*on));
            }
            record.insert("switch", switches);
        }
        record
    }
}

/// Static identity of the physical device. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub sn: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub hw_version: Option<String>,
}

/// Bus payload of a switch state.
pub fn switch_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
