use anyhow::Result;
use bms_telemetry::{
    command_queue, load_config, publish_discovery, subscribe_switches, BmsDevice, CommandSender,
    CycleLayout, DedupPublisher, DiscoveryConfigBuilder, DiscoveryMode, MetricsHub, MockBms,
    MqttConfig, PublishCycle, PublisherConfig, TopicTreeWalker, SAMPLE_DESCRIPTORS,
};
use bus_transport::{InboundHandler, InboundMessage, MessageBus, MockBus, MqttBus, MqttSettings};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "bms-mqtt")]
#[command(about = "Publish battery monitor telemetry and Home Assistant discovery over MQTT")]
struct Args {
    /// YAML config file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the in-process bus instead of connecting to a broker
    #[arg(long)]
    mock_bus: bool,

    /// Override the device topic from the config file
    #[arg(long)]
    device_topic: Option<String>,

    /// Log filter, e.g. `debug` or `bms_telemetry=trace`; falls back to RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.log_level.as_deref());

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PublisherConfig::default(),
    };
    if let Some(topic) = args.device_topic {
        config.device_topic = topic;
    }
    info!(
        "bms-mqtt starting: device topic {}, sample period {:?}",
        config.device_topic,
        config.sample_period()
    );

    let hub = MetricsHub::new().map_err(|e| anyhow::anyhow!("Failed to create metrics: {}", e))?;
    let mut device = MockBms::new(
        config.device_topic.clone(),
        config.mock.cell_count,
        config.mock.temp_sensor_count,
        &config.mock.switches,
    );

    // Inbound messages can only arrive after the switch subscriptions below, which is
    // also when the sender is stored.
    let slot: Arc<OnceLock<CommandSender>> = Arc::new(OnceLock::new());
    let handler = inbound_handler(slot.clone());
    let (bus, mqtt): (Box<dyn MessageBus>, Option<(MqttBus, JoinHandle<()>)>) = if args.mock_bus {
        let bus = MockBus::new();
        bus.set_inbound_handler(handler);
        (Box::new(bus), None)
    } else {
        let (bus, task) = MqttBus::connect(&mqtt_settings(&config.mqtt), handler);
        (Box::new(bus.clone()), Some((bus, task)))
    };
    info!("using {} bus", bus.backend());

    // the cycle refreshes this from the device before every reading
    let freshness = config.min_value_expiry().max(device.min_value_expiry());
    let mut publisher = DedupPublisher::new(bus, freshness).with_metrics(hub.publish.clone());

    let switches = config.switches_or(device.switch_names());
    let table = subscribe_switches(publisher.bus(), &config.device_topic, &switches);
    let (sender, dispatcher) = command_queue(table);
    let mut dispatcher = dispatcher.with_metrics(hub.command.clone());
    if slot.set(sender.with_metrics(hub.command.clone())).is_err() {
        warn!("inbound command sender already installed");
    }

    let info = match device.fetch_device_info().await {
        Ok(info) => info,
        Err(e) => {
            warn!("could not read device info: {:#}", e);
            Default::default()
        }
    };
    let builder = DiscoveryConfigBuilder::new(&config.device_topic)
        .with_device_info(&info)
        .with_expire_after(config.expire_after());

    let layout = match config.discovery_mode {
        DiscoveryMode::PerLeaf => {
            let walker =
                TopicTreeWalker::new(&config.device_topic).with_precision(SAMPLE_DESCRIPTORS);
            CycleLayout::PerLeaf(if config.discovery {
                walker.with_discovery(builder.clone())
            } else {
                walker
            })
        }
        DiscoveryMode::Declarative => CycleLayout::Declarative,
    };

    if config.discovery {
        let docs = match config.discovery_mode {
            DiscoveryMode::Declarative => {
                let cells = device.fetch_voltages().await.map(|v| v.len()).unwrap_or(0);
                let temps = device.fetch_temperatures().await.map(|t| t.len()).unwrap_or(0);
                builder.build_discovery_all(SAMPLE_DESCRIPTORS, cells, temps, &switches)
            }
            // every leaf, cells and temperatures included, brings its own document;
            // switches still need theirs
            DiscoveryMode::PerLeaf => builder.build_discovery_all(&[], 0, 0, &switches),
        };
        publish_discovery(&mut publisher, &docs);
    }
    let cycle = PublishCycle::new(&config.device_topic, layout)
        .with_min_value_expiry(config.min_value_expiry());

    let mut ticker = tokio::time::interval(config.sample_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match cycle.run(&mut device, &mut publisher).await {
                    Ok(sent) => debug!("publish cycle sent {} messages", sent),
                    Err(e) => warn!("publish cycle failed: {:#}", e),
                }
                check_liveness(&publisher);
            }
            Some(command) = dispatcher.recv() => {
                let report = dispatcher.dispatch(command, &mut device, &mut publisher).await;
                debug!("command drain: {} executed, {} failed", report.executed, report.failed);
            }
            _ = &mut shutdown => {
                info!("Shutting down bms-mqtt");
                break;
            }
        }
    }

    if let Some((bus, task)) = mqtt {
        if let Err(e) = bus.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("MQTT event loop did not stop in time");
        }
    }
    debug!("final metrics:\n{}", hub.encode_text());
    Ok(())
}

fn check_liveness(publisher: &DedupPublisher) {
    let limit = publisher.freshness_window() * 2;
    if let Some(since) = publisher.since_last_publish() {
        if since > limit {
            warn!("no successful publish for {:?} (limit {:?})", since, limit);
        }
    }
}

fn inbound_handler(slot: Arc<OnceLock<CommandSender>>) -> InboundHandler {
    Box::new(move |msg: InboundMessage| match slot.get() {
        Some(sender) => {
            let _ = sender.handle_inbound(&msg);
        }
        None => warn!("inbound message on {} before subscriptions were set up", msg.topic),
    })
}

fn mqtt_settings(config: &MqttConfig) -> MqttSettings {
    MqttSettings {
        host: config.host.clone(),
        port: config.port,
        client_id: config.client_id.clone(),
        username: config.username.clone(),
        password: config.password.clone(),
        keep_alive: Duration::from_secs(config.keep_alive_secs),
        channel_capacity: config.channel_capacity,
    }
}

fn setup_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
