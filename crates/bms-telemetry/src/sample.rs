//! Publication of one device reading cycle through the descriptor table.

use crate::descriptors::{
    cell_voltage_key, temperature_key, CELL_VOLTAGE_PATH, TEMPERATURE_PATH, TEMPERATURE_PRECISION,
};
use crate::discovery::DiscoverySet;
use crate::error::FormatError;
use crate::format::round_to_n;
use crate::publisher::DedupPublisher;
use crate::topics::{switch_state_topic, value_topic};
use crate::types::{switch_payload, FieldDescriptor, Record, TelemetrySample, TelemetryValue};
use tracing::info;

/// Publish every described field of `sample`, then its switch states.
///
/// Fields the sample does not carry are skipped. Returns the number of messages
/// the bus accepted.
pub fn publish_sample(
    publisher: &mut DedupPublisher,
    device_topic: &str,
    sample: &TelemetrySample,
    descriptors: &[FieldDescriptor],
) -> Result<usize, FormatError> {
    let mut sent = 0;
    for desc in descriptors {
        let Some(raw) = sample.field(desc.field) else {
            continue;
        };
        let value = round_to_n(&TelemetryValue::F64(raw), desc.precision)?;
        if publisher.publish_value(&value_topic(device_topic, desc.key), &value, false) {
            sent += 1;
        }
    }
    for (name, on) in &sample.switches {
        if publisher.publish(&switch_state_topic(device_topic, name), switch_payload(*on), false) {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Cell voltages arrive in millivolts and go out in volts, numbered from 1.
pub fn publish_cell_voltages(
    publisher: &mut DedupPublisher,
    device_topic: &str,
    voltages_mv: &[u32],
) -> usize {
    let mut sent = 0;
    for (i, mv) in voltages_mv.iter().enumerate() {
        let volts = TelemetryValue::F64(f64::from(*mv) / 1000.0);
        if publisher.publish_value(&value_topic(device_topic, &cell_voltage_key(i + 1)), &volts, false) {
            sent += 1;
        }
    }
    sent
}

pub fn publish_temperatures(
    publisher: &mut DedupPublisher,
    device_topic: &str,
    temperatures: &[f64],
) -> Result<usize, FormatError> {
    let mut sent = 0;
    for (i, t) in temperatures.iter().enumerate() {
        let value = round_to_n(&TelemetryValue::F64(*t), TEMPERATURE_PRECISION)?;
        if publisher.publish_value(&value_topic(device_topic, &temperature_key(i + 1)), &value, false) {
            sent += 1;
        }
    }
    Ok(sent)
}

/// The whole reading cycle as one record: the sample's own tree plus
/// `cell_voltages/<i>` in volts and `temperatures/<i>`, both numbered from 1.
pub fn sample_record(sample: &TelemetrySample, voltages_mv: &[u32], temperatures: &[f64]) -> Record {
    let mut record = sample.to_record();
    if !voltages_mv.is_empty() {
        let mut cells = Record::new();
        for (i, mv) in voltages_mv.iter().enumerate() {
            cells.insert((i + 1).to_string(), f64::from(*mv) / 1000.0);
        }
        record.insert(CELL_VOLTAGE_PATH, cells);
    }
    if !temperatures.is_empty() {
        let mut temps = Record::new();
        for (i, t) in temperatures.iter().enumerate() {
            temps.insert((i + 1).to_string(), *t);
        }
        record.insert(TEMPERATURE_PATH, temps);
    }
    record
}

/// Send every discovery document of `documents`, retained.
///
/// Switch state entries are only placeholders for topics the switch itself keeps
/// up to date and are not sent here.
pub fn publish_discovery(publisher: &mut DedupPublisher, documents: &DiscoverySet) -> usize {
    let mut sent = 0;
    for (topic, entry) in documents {
        if let Some(payload) = entry.payload() {
            if publisher.publish(topic, &payload, true) {
                sent += 1;
            }
        }
    }
    info!("sent {} of {} discovery topics", sent, documents.len());
    sent
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::descriptors::SAMPLE_DESCRIPTORS;
    use crate::discovery::build_discovery_all;
    use bus_transport::MockBus;
    use std::time::Duration;

    fn publisher(bus: &MockBus) -> DedupPublisher {
        DedupPublisher::new(bus.clone(), Duration::from_secs(20))
    }

    fn sample() -> TelemetrySample {
        let mut sample = TelemetrySample {
            voltage: 26.512345,
            current: -1.25,
            soc: 87.0,
            capacity: Some(100.0),
            ..Default::default()
        };
        sample.switches.insert("charge".into(), true);
        sample.switches.insert("discharge".into(), false);
        sample
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_rounded_fields_and_switches() {
        let bus = MockBus::new();
        let mut p = publisher(&bus);
        let sent = publish_sample(&mut p, "jbd", &sample(), SAMPLE_DESCRIPTORS).unwrap();

        assert_eq!(bus.last_payload("jbd/soc/total_voltage").as_deref(), Some("26.51"));
        assert_eq!(bus.last_payload("jbd/soc/current").as_deref(), Some("-1.25"));
        assert_eq!(bus.last_payload("jbd/soc/soc_percent").as_deref(), Some("87"));
        // power derived from voltage * current
        assert_eq!(bus.last_payload("jbd/soc/power").as_deref(), Some("-33.14"));
        assert_eq!(bus.last_payload("jbd/switch/charge").as_deref(), Some("ON"));
        assert_eq!(bus.last_payload("jbd/switch/discharge").as_deref(), Some("OFF"));
        assert!(bus.last_payload("jbd/soc/balance_current").is_none());
        assert!(bus.last_payload("jbd/mosfet_status/temperature").is_none());
        assert_eq!(sent, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cell_voltages_are_volts_and_one_based() {
        let bus = MockBus::new();
        let mut p = publisher(&bus);
        assert_eq!(publish_cell_voltages(&mut p, "jbd", &[3325, 3331]), 2);
        assert_eq!(bus.last_payload("jbd/cell_voltages/1").as_deref(), Some("3.325"));
        assert_eq!(bus.last_payload("jbd/cell_voltages/2").as_deref(), Some("3.331"));
        assert!(bus.last_payload("jbd/cell_voltages/0").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn temperatures_use_four_digits() {
        let bus = MockBus::new();
        let mut p = publisher(&bus);
        assert_eq!(publish_temperatures(&mut p, "jbd", &[21.34567, 19.0]).unwrap(), 2);
        assert_eq!(bus.last_payload("jbd/temperatures/1").as_deref(), Some("21.35"));
        assert_eq!(bus.last_payload("jbd/temperatures/2").as_deref(), Some("19"));
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_is_retained_and_skips_state_placeholders() {
        let bus = MockBus::new();
        let mut p = publisher(&bus);
        let docs = build_discovery_all("jbd", SAMPLE_DESCRIPTORS, 2, 1, 60, None, &["charge"]);
        let sent = publish_discovery(&mut p, &docs);

        assert_eq!(sent, docs.len() - 1);
        assert!(bus.published().iter().all(|m| m.retain));
        assert!(bus.published_to("jbd/switch/charge").is_empty());
        assert_eq!(
            bus.published_to("homeassistant/switch/jbd/charge/config").len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn format_error_escapes_and_field_is_not_sent() {
        use crate::types::SampleField;

        const DESCRIPTORS: &[FieldDescriptor] = &[
            FieldDescriptor {
                key: "soc/total_voltage",
                field: SampleField::Voltage,
                class: None,
                unit: Some("V"),
                precision: 0,
                icon: None,
            },
        ];
        let bus = MockBus::new();
        let mut p = publisher(&bus);
        let result = publish_sample(&mut p, "jbd", &sample(), DESCRIPTORS);

        assert_eq!(result, Err(FormatError::InvalidPrecision(0)));
        assert!(bus.published_to("jbd/soc/total_voltage").is_empty());
        assert!(p.cached("jbd/soc/total_voltage").is_none());
    }

    #[test]
    fn sample_record_carries_cells_and_temperatures() {
        let record = sample_record(&sample(), &[3325, 3331], &[21.5]);
        let cells = match record.get("cell_voltages") {
            Some(TelemetryValue::Record(cells)) => cells.clone(),
            other => panic!("unexpected cell_voltages {other:?}"),
        };
        assert_eq!(cells.get("1"), Some(&TelemetryValue::F64(3.325)));
        assert_eq!(cells.get("2"), Some(&TelemetryValue::F64(3.331)));
        assert!(matches!(record.get("temperatures"), Some(TelemetryValue::Record(_))));
        assert!(sample_record(&sample(), &[], &[]).get("cell_voltages").is_none());
    }
}
