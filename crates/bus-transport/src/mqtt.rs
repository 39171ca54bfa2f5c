use crate::types::validate_publish_topic;
use crate::{InboundHandler, InboundMessage, MessageBus, QoS, Result, TransportError};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Broker connection settings.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Capacity of the request channel between client handle and event loop.
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "bms-mqtt".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// MQTT backend over `rumqttc`.
///
/// Connection, reconnection and keep-alive are owned by the event loop task spawned in
/// [`MqttBus::connect`]; this handle only queues requests.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
}

impl MqttBus {
    /// Create the client and spawn its event loop on the current tokio runtime.
    ///
    /// `handler` is called from the event loop task for every inbound publish.
    pub fn connect(
        settings: &MqttSettings,
        handler: InboundHandler,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, settings.channel_capacity.max(1));
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let bus = Self {
            client: client.clone(),
            subscriptions: subscriptions.clone(),
        };
        info!(
            "MQTT client {} connecting to {}:{}",
            settings.client_id, settings.host, settings.port
        );
        let handle = tokio::spawn(run_event_loop(event_loop, client, subscriptions, handler));
        (bus, handle)
    }

    /// Send a Disconnect; the event loop task ends once it has gone out.
    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

impl MessageBus for MqttBus {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        validate_publish_topic(topic)?;
        self.client
            .try_publish(topic, rumqttc::QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic("empty topic".to_string()));
        }
        self.subscriptions.lock().push((topic.to_string(), qos));
        self.client
            .try_subscribe(topic, to_rumqttc(qos))
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "mqtt"
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    handler: InboundHandler,
) {
    let mut error_count: u32 = 0;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ConnAck {
                session_present,
                code: ConnectReturnCode::Success,
            }))) => {
                error_count = 0;
                if session_present {
                    info!("MQTT connected, session preserved by broker");
                } else {
                    let subs = subscriptions.lock().clone();
                    info!("MQTT connected without session, subscribing {} topics", subs.len());
                    for (topic, qos) in subs {
                        if let Err(e) = client.try_subscribe(topic.as_str(), to_rumqttc(qos)) {
                            error!("failed to resubscribe {}: {}", topic, e);
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
                warn!("MQTT broker rejected connection: {:?}", code);
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                error_count = 0;
                debug!(topic = %p.topic, payload_size = p.payload.len(), "received MQTT message");
                handler(InboundMessage::new(p.topic, p.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("received MQTT Disconnect from server");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("sent MQTT Disconnect to server");
                break;
            }
            Ok(_) => {
                error_count = 0;
            }
            Err(err) => {
                error_count = error_count.saturating_add(1);
                let delay = INITIAL_RETRY_DELAY
                    .saturating_mul(2_u32.pow((error_count - 1).min(10)))
                    .min(MAX_RETRY_DELAY);
                warn!(error = %err, error_count, delay = ?delay, "MQTT event loop error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
    info!("MQTT event loop terminated");
}
