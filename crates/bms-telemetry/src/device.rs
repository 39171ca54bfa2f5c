use crate::types::{DeviceInfo, TelemetrySample};
use async_trait::async_trait;
use std::time::Duration;

/// Battery monitor driver as seen by the publish loop and the command dispatcher.
///
/// Only ever driven from one task, so implementations need `Send` but not `Sync`.
#[async_trait]
pub trait BmsDevice: Send {
    fn name(&self) -> &str;

    /// How long a published value stays valid for consumers of this device.
    fn min_value_expiry(&self) -> Duration {
        crate::MIN_VALUE_EXPIRY
    }

    async fn fetch(&mut self) -> anyhow::Result<TelemetrySample>;

    /// Per-cell voltages in millivolts.
    async fn fetch_voltages(&mut self) -> anyhow::Result<Vec<u32>>;

    /// Temperature sensor readings in °C.
    async fn fetch_temperatures(&mut self) -> anyhow::Result<Vec<f64>>;

    async fn fetch_device_info(&mut self) -> anyhow::Result<DeviceInfo>;

    /// Switches this device exposes for remote control.
    fn switch_names(&self) -> Vec<String>;

    async fn set_switch(&mut self, name: &str, state: bool) -> anyhow::Result<()>;
}

#[cfg(feature = "mock")]
pub use mock::MockBms;

#[cfg(feature = "mock")]
mod mock {
    use super::*;
    use anyhow::bail;
    use std::collections::{BTreeMap, HashSet};

    /// In-process battery with deterministic readings.
    pub struct MockBms {
        name: String,
        cell_count: usize,
        temp_sensor_count: usize,
        switches: BTreeMap<String, bool>,
        failing: HashSet<String>,
        calls: Vec<(String, bool)>,
        command_latency: Duration,
        cycle: u64,
    }

    impl MockBms {
        pub fn new<S: AsRef<str>>(
            name: impl Into<String>,
            cell_count: usize,
            temp_sensor_count: usize,
            switches: &[S],
        ) -> Self {
            Self {
                name: name.into(),
                cell_count,
                temp_sensor_count,
                switches: switches
                    .iter()
                    .map(|s| (s.as_ref().to_string(), false))
                    .collect(),
                failing: HashSet::new(),
                calls: Vec::new(),
                command_latency: Duration::ZERO,
                cycle: 0,
            }
        }

        /// Make every `set_switch` on `name` fail.
        pub fn fail_switch(&mut self, name: impl Into<String>) {
            self.failing.insert(name.into());
        }

        /// Simulated time a switch command takes on the device.
        pub fn set_command_latency(&mut self, latency: Duration) {
            self.command_latency = latency;
        }

        /// Every `set_switch` call in the order received, failed ones included.
        pub fn calls(&self) -> &[(String, bool)] {
            &self.calls
        }

        pub fn switch_state(&self, name: &str) -> Option<bool> {
            self.switches.get(name).copied()
        }

        fn cell_mv(&self, index: usize) -> u32 {
            3300 + ((self.cycle as usize + index * 7) % 40) as u32
        }
    }

    #[async_trait]
    impl BmsDevice for MockBms {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&mut self) -> anyhow::Result<TelemetrySample> {
            self.cycle += 1;
            let voltage = (0..self.cell_count).map(|i| f64::from(self.cell_mv(i))).sum::<f64>() / 1000.0;
            let current = if self.switches.get("charge").copied().unwrap_or(false) {
                4.5
            } else {
                -1.5 - (self.cycle % 5) as f64 * 0.1
            };
            Ok(TelemetrySample {
                voltage,
                current,
                balance_current: Some(0.0),
                soc: 80.0 - (self.cycle % 20) as f64 * 0.5,
                power: None,
                capacity: Some(100.0),
                cycle_capacity: Some(2500.0 + self.cycle as f64 * 0.001),
                charge: Some(80.0),
                mos_temperature: Some(25.0 + (self.cycle % 3) as f64 * 0.25),
                switches: self.switches.clone(),
            })
        }

        async fn fetch_voltages(&mut self) -> anyhow::Result<Vec<u32>> {
            Ok((0..self.cell_count).map(|i| self.cell_mv(i)).collect())
        }

        async fn fetch_temperatures(&mut self) -> anyhow::Result<Vec<f64>> {
            Ok((0..self.temp_sensor_count).map(|i| 21.0 + i as f64 * 0.5).collect())
        }

        async fn fetch_device_info(&mut self) -> anyhow::Result<DeviceInfo> {
            Ok(DeviceInfo {
                sn: Some(format!("MOCK-{}", self.name)),
                name: Some(self.name.clone()),
                model: Some("mock".into()),
                sw_version: Some(env!("CARGO_PKG_VERSION").into()),
                hw_version: None,
            })
        }

        fn switch_names(&self) -> Vec<String> {
            self.switches.keys().cloned().collect()
        }

        async fn set_switch(&mut self, name: &str, state: bool) -> anyhow::Result<()> {
            self.calls.push((name.to_string(), state));
            if !self.command_latency.is_zero() {
                tokio::time::sleep(self.command_latency).await;
            }
            if self.failing.contains(name) {
                bail!("device refused to set {name}");
            }
            match self.switches.get_mut(name) {
                Some(current) => {
                    *current = state;
                    Ok(())
                }
                None => bail!("unknown switch {name}"),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn readings_match_configured_layout() {
            let mut bms = MockBms::new("mock", 4, 2, &["charge"]);
            let voltages = bms.fetch_voltages().await.unwrap();
            assert_eq!(voltages.len(), 4);
            assert!(voltages.iter().all(|mv| (3300..3340).contains(mv)));
            assert_eq!(bms.fetch_temperatures().await.unwrap().len(), 2);
            let sample = bms.fetch().await.unwrap();
            assert_eq!(sample.switches.get("charge"), Some(&false));
            assert!(sample.power.is_none());
        }

        #[tokio::test]
        async fn records_calls_and_fails_on_request() {
            let mut bms = MockBms::new("mock", 1, 0, &["charge", "discharge"]);
            bms.fail_switch("discharge");
            bms.set_switch("charge", true).await.unwrap();
            assert!(bms.set_switch("discharge", true).await.is_err());
            assert!(bms.set_switch("heater", true).await.is_err());

            assert_eq!(bms.switch_state("charge"), Some(true));
            assert_eq!(bms.switch_state("discharge"), Some(false));
            assert_eq!(bms.calls().len(), 3);
        }
    }
}
