use crate::types::{DeviceClass, FieldDescriptor, SampleField};

pub const DEFAULT_PRECISION: u32 = 5;

const fn desc(
    key: &'static str,
    field: SampleField,
    class: Option<DeviceClass>,
    unit: &'static str,
    precision: u32,
    icon: Option<&'static str>,
) -> FieldDescriptor {
    FieldDescriptor {
        key,
        field,
        class,
        unit: Some(unit),
        precision,
        icon,
    }
}

/// Fields published from every [`TelemetrySample`](crate::TelemetrySample).
///
/// The digit counts are fixed constants, not derived from sensor accuracy.
pub const SAMPLE_DESCRIPTORS: &[FieldDescriptor] = &[
    desc(
        "soc/total_voltage",
        SampleField::Voltage,
        Some(DeviceClass::Voltage),
        "V",
        4,
        Some("meter-electric"),
    ),
    desc(
        "soc/current",
        SampleField::Current,
        Some(DeviceClass::Current),
        "A",
        4,
        None,
    ),
    desc(
        "soc/balance_current",
        SampleField::BalanceCurrent,
        Some(DeviceClass::Current),
        "A",
        4,
        Some("scale-unbalanced"),
    ),
    desc(
        "soc/soc_percent",
        SampleField::Soc,
        Some(DeviceClass::Battery),
        "%",
        4,
        Some("battery"),
    ),
    desc(
        "soc/power",
        SampleField::Power,
        Some(DeviceClass::Power),
        "W",
        4,
        Some("flash"),
    ),
    desc(
        "soc/capacity",
        SampleField::Capacity,
        None,
        "Ah",
        DEFAULT_PRECISION,
        None,
    ),
    desc(
        "soc/cycle_capacity",
        SampleField::CycleCapacity,
        None,
        "Ah",
        DEFAULT_PRECISION,
        None,
    ),
    desc(
        "mosfet_status/capacity_ah",
        SampleField::Charge,
        None,
        "Ah",
        DEFAULT_PRECISION,
        None,
    ),
    desc(
        "mosfet_status/temperature",
        SampleField::MosTemperature,
        Some(DeviceClass::Temperature),
        "°C",
        DEFAULT_PRECISION,
        Some("thermometer"),
    ),
];

pub const CELL_VOLTAGE_PATH: &str = "cell_voltages";
pub const TEMPERATURE_PATH: &str = "temperatures";
pub const TEMPERATURE_PRECISION: u32 = 4;

/// Path of the 1-based cell voltage slot `index`.
pub fn cell_voltage_key(index: usize) -> String {
    format!("{CELL_VOLTAGE_PATH}/{index}")
}

/// Path of the 1-based temperature sensor slot `index`.
pub fn temperature_key(index: usize) -> String {
    format!("{TEMPERATURE_PATH}/{index}")
}

/// Significant digits for a field path: the matching descriptor's, four for
/// temperature slots, the default otherwise.
pub fn precision_for(path: &str, descriptors: &[FieldDescriptor]) -> u32 {
    let path = path.trim_start_matches('/');
    if let Some(d) = descriptors.iter().find(|d| d.key == path) {
        return d.precision;
    }
    if path.starts_with(TEMPERATURE_PATH) {
        TEMPERATURE_PRECISION
    } else {
        DEFAULT_PRECISION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn descriptor_keys_are_unique() {
        let keys: HashSet<&str> = SAMPLE_DESCRIPTORS.iter().map(|d| d.key).collect();
        assert_eq!(keys.len(), SAMPLE_DESCRIPTORS.len());
    }

    #[test]
    fn voltage_uses_four_digits() {
        let voltage = SAMPLE_DESCRIPTORS
            .iter()
            .find(|d| d.field == SampleField::Voltage)
            .unwrap();
        assert_eq!(voltage.precision, 4);
        assert_eq!(voltage.unit, Some("V"));
    }

    #[test]
    fn precision_lookup_by_path() {
        assert_eq!(precision_for("/soc/total_voltage", SAMPLE_DESCRIPTORS), 4);
        assert_eq!(precision_for("soc/capacity", SAMPLE_DESCRIPTORS), 5);
        assert_eq!(precision_for("/temperatures/2", SAMPLE_DESCRIPTORS), 4);
        assert_eq!(precision_for("/cell_voltages/1", SAMPLE_DESCRIPTORS), DEFAULT_PRECISION);
        assert_eq!(precision_for("/soc/total_voltage", &[]), DEFAULT_PRECISION);
    }
}
