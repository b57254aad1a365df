//! up-mqtt5 - command line client for the uProtocol MQTT5 transport
//!
//! ```bash
//! # publish a text payload from the configured source on topic 0x8001
//! up-mqtt5 -c transport.toml send --resource 8001 --payload "hello" --ttl 5000
//!
//! # notify one consumer
//! up-mqtt5 send --sink //cloud/AB/1/0 --payload "door open"
//!
//! # print everything published by device1
//! up-mqtt5 listen --source //device1/FFFF/FF/FFFF
//! ```

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};
use up_mqtt5_transport::observability::init_default_logging;
use up_mqtt5_transport::transport::mqtt::RumqttcBroker;
use up_mqtt5_transport::{
    TransportConfig, TransportFactory, UMessage, UMessageBuilder, UPayloadFormat, UTransport, UUri,
};

const DEFAULT_CONFIG_PATHS: &[&str] = &["transport.toml", "config/transport.toml"];

/// uProtocol over MQTT 5
#[derive(Parser)]
#[command(name = "up-mqtt5")]
#[command(about = "Send and receive uProtocol messages through an MQTT 5 broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message from the configured source
    Send {
        /// Topic resource id of the source, in hex
        #[arg(long, default_value = "8000", value_parser = parse_resource_id)]
        resource: u16,
        /// Consumer to notify; publishes to all subscribers when omitted
        #[arg(long)]
        sink: Option<UUri>,
        /// Text payload
        #[arg(long)]
        payload: String,
        /// Time to live in milliseconds
        #[arg(long)]
        ttl: Option<u32>,
    },
    /// Print received messages until interrupted
    Listen {
        /// Source filter, wildcards allowed
        #[arg(long)]
        source: Option<UUri>,
        /// Sink filter, wildcards allowed
        #[arg(long)]
        sink: Option<UUri>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn parse_resource_id(value: &str) -> Result<u16, String> {
    u16::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid resource id '{value}': {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Send {
            resource,
            sink,
            payload,
            ttl,
        } => send_message(config, resource, sink, payload, ttl).await,
        Commands::Listen { source, sink } => listen(config, source, sink).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<TransportConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(TransportConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(TransportConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create transport.toml".into())
}

async fn send_message(
    config: TransportConfig,
    resource: u16,
    sink: Option<UUri>,
    payload: String,
    ttl: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let transport = TransportFactory::connect(&config).await?;

    let mut topic = transport.source().clone();
    topic.resource_id = resource;
    let mut builder = match sink {
        Some(sink) => UMessageBuilder::notification(topic, sink),
        None => UMessageBuilder::publish(topic),
    };
    if let Some(ttl) = ttl {
        builder = builder.with_ttl(ttl);
    }
    let message = builder.build_with_payload(payload, UPayloadFormat::Text);
    let id = message.attributes.id;

    let status = transport.send(message).await?;
    transport.close();
    // let the event loop flush the queued PUBLISH and DISCONNECT
    sleep(Duration::from_millis(250)).await;

    if status.is_ok() {
        println!("{}", json!({ "id": id, "status": status.code }));
        Ok(())
    } else {
        Err(status.into())
    }
}

async fn listen(
    config: TransportConfig,
    source_filter: Option<UUri>,
    sink_filter: Option<UUri>,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Arc::new(RumqttcBroker::connect(&config.mqtt).await?);
    let transport = TransportFactory::create(config.source.to_uri(), broker.clone())?;

    let printer = Arc::new(|message: UMessage| {
        let line = json!({
            "attributes": message.attributes,
            "payload": String::from_utf8_lossy(&message.payload),
        });
        println!("{line}");
    });
    let handle = transport
        .register_listener(source_filter.as_ref(), sink_filter.as_ref(), printer)
        .await?;
    info!(filter = %handle.topic_filter(), "Listening, press Ctrl-C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
        }
        _ = monitor_connection_health(&broker) => {
            error!("MQTT connection permanently lost, shutting down");
        }
    }

    let status = transport.unregister_listener(&handle).await;
    if !status.is_ok() {
        warn!(status = %status, "Failed to unregister listener");
    }
    transport.close();
    sleep(Duration::from_millis(250)).await;
    Ok(())
}

fn handle_config_command(
    config: &TransportConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(source = %config.source.to_uri(), "Configuration is valid");
    Ok(())
}

/// Resolve once the broker client has given up reconnecting
async fn monitor_connection_health(broker: &RumqttcBroker) {
    while !broker.is_permanently_disconnected() {
        sleep(Duration::from_millis(100)).await;
    }
}
