//! Relay Publisher CLI
//!
//! Reads NDJSON change events from stdin (the change event source is an
//! external collaborator) and fans each one out onto the bus.

use clap::Parser;
use relay_core::prelude::*;
use relay_publisher::{FanOutPublisher, JetStreamSink, JetStreamSinkConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-publisher")]
#[command(about = "Change event fan-out publisher for the doc-sync relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<String>,

    /// Bus server URL
    #[arg(long, env = "BUS_URL")]
    bus_url: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay-publisher");

    let mut config = RelayConfig::load(args.config.as_deref())?;
    if let Some(url) = args.bus_url {
        config.bus.url = url;
    }

    let sink_config = JetStreamSinkConfig {
        url: config.bus.url,
        work_topic: config.topics.work_topic,
        trigger_topic: config.topics.trigger_topic,
        connection_name: config.bus.connection_name,
        ..Default::default()
    };
    let sink = JetStreamSink::connect(sink_config).await?;
    let publisher = FanOutPublisher::new(sink);

    info!("Publisher initialized, reading change events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let event = match ChangeEvent::from_bytes(line.as_bytes()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "Skipping undecodable change event");
                                continue;
                            }
                        };
                        if let Err(e) = publisher.publish(&event).await {
                            error!(error = %e, record_id = %event.record_id, "Failed to handle change event");
                        }
                    }
                    Ok(None) => {
                        info!("Change event stream closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read change event stream");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!(
        processed = publisher.processed_count(),
        "Publisher stopped gracefully"
    );
    Ok(())
}
