//! Inbound switch commands: decoded on the transport side, executed in order on the
//! device side.
//!
//! [`CommandSender`] is handed to the bus delivery context and only ever looks up a
//! topic and sends on an unbounded channel. [`CommandDispatcher`] is owned by the
//! main task, which is the only place the device is touched.

use crate::device::BmsDevice;
use crate::error::DispatchError;
use crate::metrics::CommandMetrics;
use crate::publisher::DedupPublisher;
use crate::topics::{switch_command_topic, switch_state_topic};
use crate::types::switch_payload;
use bus_transport::{InboundHandler, InboundMessage, MessageBus, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetSwitch { name: String, state: bool },
}

impl Command {
    pub fn switch_name(&self) -> &str {
        match self {
            Command::SetSwitch { name, .. } => name,
        }
    }
}

/// What an inbound topic controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRoute {
    Switch(String),
}

/// Inbound command topics of one device, fixed once subscriptions are set up.
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    device_topic: String,
    routes: HashMap<String, CommandRoute>,
}

impl SubscriptionTable {
    pub fn new(device_topic: impl Into<String>) -> Self {
        Self {
            device_topic: device_topic.into(),
            routes: HashMap::new(),
        }
    }

    pub fn device_topic(&self) -> &str {
        &self.device_topic
    }

    pub fn insert(&mut self, topic: impl Into<String>, route: CommandRoute) {
        self.routes.insert(topic.into(), route);
    }

    pub fn route(&self, topic: &str) -> Option<&CommandRoute> {
        self.routes.get(topic)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Turn an inbound message into a command.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Command, DispatchError> {
        let text = String::from_utf8_lossy(payload);
        match self.route(topic) {
            None => Err(DispatchError::Unroutable {
                topic: topic.to_string(),
                payload: text.into_owned(),
            }),
            Some(CommandRoute::Switch(name)) => match parse_switch_payload(&text) {
                Some(state) => Ok(Command::SetSwitch {
                    name: name.clone(),
                    state,
                }),
                None => Err(DispatchError::InvalidPayload {
                    topic: topic.to_string(),
                    payload: text.into_owned(),
                }),
            },
        }
    }
}

/// `ON`/`OFF` in any letter case, surrounding whitespace ignored.
pub fn parse_switch_payload(payload: &str) -> Option<bool> {
    let payload = payload.trim();
    if payload.eq_ignore_ascii_case("on") {
        Some(true)
    } else if payload.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

/// Subscribe to the command topic of every switch with QoS 2.
///
/// A switch whose subscription the bus rejects is left out of the table.
pub fn subscribe_switches<S: AsRef<str>>(
    bus: &dyn MessageBus,
    device_topic: &str,
    switches: &[S],
) -> SubscriptionTable {
    let mut table = SubscriptionTable::new(device_topic);
    for name in switches {
        let name = name.as_ref();
        let topic = switch_command_topic(device_topic, name);
        match bus.subscribe(&topic, QoS::ExactlyOnce) {
            Ok(()) => {
                info!("subscribed to {}", topic);
                table.insert(topic, CommandRoute::Switch(name.to_string()));
            }
            Err(e) => warn!("subscribe to {} failed: {}", topic, e),
        }
    }
    table
}

/// Create the two ends of the command queue around a finished subscription table.
pub fn command_queue(table: SubscriptionTable) -> (CommandSender, CommandDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let device_topic = table.device_topic().to_string();
    (
        CommandSender {
            table: Arc::new(table),
            tx,
            metrics: None,
        },
        CommandDispatcher {
            rx,
            device_topic,
            metrics: None,
        },
    )
}

/// Producer end. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct CommandSender {
    table: Arc<SubscriptionTable>,
    tx: mpsc::UnboundedSender<Command>,
    metrics: Option<CommandMetrics>,
}

impl CommandSender {
    #[must_use]
    pub fn with_metrics(mut self, metrics: CommandMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Decode and enqueue one inbound message. Undecodable messages are logged and
    /// dropped; the error is returned for callers that want it.
    pub fn handle_inbound(&self, msg: &InboundMessage) -> Result<(), DispatchError> {
        match self.table.decode(&msg.topic, &msg.payload) {
            Ok(command) => {
                info!("received command {:?} on {}", command, msg.topic);
                self.enqueue(command);
                Ok(())
            }
            Err(e) => {
                warn!("dropping inbound message: {}", e);
                if let Some(m) = &self.metrics {
                    m.unroutable.inc();
                }
                Err(e)
            }
        }
    }

    /// Returns `false` once the dispatcher is gone.
    pub fn enqueue(&self, command: Command) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("command queue closed, dropping {:?}", e.0);
                false
            }
        }
    }

    /// Wrap this sender as a bus inbound handler.
    pub fn into_handler(self) -> InboundHandler {
        Box::new(move |msg: InboundMessage| {
            let _ = self.handle_inbound(&msg);
        })
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
}

/// Consumer end, owned by the task that owns the device.
///
/// Every method takes `&mut self`, so two drains can never overlap.
pub struct CommandDispatcher {
    rx: mpsc::UnboundedReceiver<Command>,
    device_topic: String,
    metrics: Option<CommandMetrics>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn with_metrics(mut self, metrics: CommandMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wait for the next command. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Run a single command against the device. Failures are logged, never returned.
    pub async fn execute(
        &mut self,
        command: Command,
        device: &mut dyn BmsDevice,
        publisher: &mut DedupPublisher,
    ) -> bool {
        if let Some(m) = &self.metrics {
            m.commands.inc();
        }
        match &command {
            Command::SetSwitch { name, state } => match device.set_switch(name, *state).await {
                Ok(()) => {
                    info!("{} switch {} set to {}", device.name(), name, switch_payload(*state));
                    let topic = switch_state_topic(&self.device_topic, name);
                    publisher.publish(&topic, switch_payload(*state), false);
                    true
                }
                Err(e) => {
                    error!("command {:?} failed on {}: {:?}", command, device.name(), e);
                    if let Some(m) = &self.metrics {
                        m.command_failures.inc();
                    }
                    false
                }
            },
        }
    }

    /// Execute `first`, then keep executing queued commands until the queue is
    /// observed empty. Commands enqueued meanwhile run in the same pass.
    pub async fn dispatch(
        &mut self,
        first: Command,
        device: &mut dyn BmsDevice,
        publisher: &mut DedupPublisher,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        report.record(self.execute(first, device, publisher).await);
        let rest = self.drain(device, publisher).await;
        report.executed += rest.executed;
        report.failed += rest.failed;
        report
    }

    /// Execute queued commands one at a time in arrival order until none are left.
    pub async fn drain(
        &mut self,
        device: &mut dyn BmsDevice,
        publisher: &mut DedupPublisher,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        while let Ok(command) = self.rx.try_recv() {
            report.record(self.execute(command, device, publisher).await);
        }
        report
    }
}

impl DrainReport {
    fn record(&mut self, ok: bool) {
        self.executed += 1;
        if !ok {
            self.failed += 1;
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::device::MockBms;
    use bus_transport::MockBus;
    use std::time::Duration;

    fn table() -> SubscriptionTable {
        let mut table = SubscriptionTable::new("jbd");
        table.insert(
            "homeassistant/switch/jbd/charge/set",
            CommandRoute::Switch("charge".into()),
        );
        table
    }

    #[test]
    fn payloads_are_case_insensitive() {
        assert_eq!(parse_switch_payload("ON"), Some(true));
        assert_eq!(parse_switch_payload("on"), Some(true));
        assert_eq!(parse_switch_payload(" Off\n"), Some(false));
        assert_eq!(parse_switch_payload("toggle"), None);
        assert_eq!(parse_switch_payload(""), None);
    }

    #[test]
    fn decodes_known_topics_only() {
        let table = table();
        assert_eq!(
            table.decode("homeassistant/switch/jbd/charge/set", b"ON"),
            Ok(Command::SetSwitch {
                name: "charge".into(),
                state: true
            })
        );
        assert!(matches!(
            table.decode("homeassistant/switch/jbd/heater/set", b"ON"),
            Err(DispatchError::Unroutable { .. })
        ));
        assert!(matches!(
            table.decode("homeassistant/switch/jbd/charge/set", b"maybe"),
            Err(DispatchError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn subscribes_every_switch_with_qos2() {
        let bus = MockBus::new();
        let table = subscribe_switches(&bus, "jbd", &["charge", "discharge"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            bus.subscriptions(),
            vec![
                ("homeassistant/switch/jbd/charge/set".to_string(), QoS::ExactlyOnce),
                ("homeassistant/switch/jbd/discharge/set".to_string(), QoS::ExactlyOnce),
            ]
        );
        assert_eq!(
            table.route("homeassistant/switch/jbd/discharge/set"),
            Some(&CommandRoute::Switch("discharge".into()))
        );
    }

    #[test]
    fn rejected_subscription_is_left_out() {
        let bus = MockBus::new();
        bus.set_offline(true);
        let table = subscribe_switches(&bus, "jbd", &["charge"]);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unroutable_messages_are_not_enqueued() {
        let (sender, mut dispatcher) = command_queue(table());
        let msg = InboundMessage::new("jbd/elsewhere", b"ON".to_vec());
        assert!(sender.handle_inbound(&msg).is_err());

        let bus = MockBus::new();
        let mut publisher = DedupPublisher::new(bus.clone(), Duration::from_secs(20));
        let mut bms = MockBms::new("jbd", 1, 0, &["charge"]);
        let report = dispatcher.drain(&mut bms, &mut publisher).await;
        assert_eq!(report, DrainReport::default());
        assert!(bms.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_publishes_the_new_state() {
        let (sender, mut dispatcher) = command_queue(table());
        let bus = MockBus::new();
        let mut publisher = DedupPublisher::new(bus.clone(), Duration::from_secs(20));
        let mut bms = MockBms::new("jbd", 1, 0, &["charge"]);

        sender
            .handle_inbound(&InboundMessage::new(
                "homeassistant/switch/jbd/charge/set",
                b"on".to_vec(),
            ))
            .unwrap();
        let first = dispatcher.recv().await.unwrap();
        let report = dispatcher.dispatch(first, &mut bms, &mut publisher).await;

        assert_eq!(report.executed, 1);
        assert_eq!(bms.switch_state("charge"), Some(true));
        assert_eq!(bus.last_payload("jbd/switch/charge").as_deref(), Some("ON"));
    }
}
