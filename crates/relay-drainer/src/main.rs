//! Relay Drainer CLI
//!
//! Waits for trigger messages and runs one drain cycle per trigger batch:
//! pull work messages, apply upserts and deletes to the derived collection,
//! acknowledge everything visited.

use clap::Parser;
use relay_core::prelude::*;
use relay_drainer::{run_triggered, DocStoreClient, Drainer, JetStreamSource, JetStreamSourceConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-drainer")]
#[command(about = "Triggered drain loop for the doc-sync relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<String>,

    /// Bus server URL
    #[arg(long, env = "BUS_URL")]
    bus_url: Option<String>,

    /// Run a single drain cycle and exit instead of waiting for triggers
    #[arg(long)]
    once: bool,

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

    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay-drainer");

    let mut config = RelayConfig::load(args.config.as_deref())?;
    if let Some(url) = args.bus_url {
        config.bus.url = url;
    }

    let work_source = JetStreamSource::connect(JetStreamSourceConfig {
        url: config.bus.url.clone(),
        topic: config.topics.work_topic.clone(),
        subscription: config.topics.work_subscription.clone(),
        ordered: true,
        ack_deadline: config.drain.ack_deadline,
        pull_wait: config.drain.pull_wait,
        connection_name: config.bus.connection_name.clone(),
        ..Default::default()
    })
    .await?;

    let store = Arc::new(DocStoreClient::new(config.store.clone())?);
    if let Err(e) = store.ping().await {
        warn!(error = %e, "Document store not reachable at startup");
    }

    let drainer = Drainer::new(work_source, store.clone(), store);

    if args.once {
        let report = drainer.drain(config.drain.max_messages).await;
        info!(%report, "Single drain cycle finished");
        return Ok(());
    }

    let trigger_source = JetStreamSource::connect(JetStreamSourceConfig {
        url: config.bus.url.clone(),
        topic: config.topics.trigger_topic.clone(),
        subscription: config.topics.trigger_subscription.clone(),
        ordered: false,
        ack_deadline: config.drain.ack_deadline,
        pull_wait: config.drain.trigger_wait,
        connection_name: config.bus.connection_name.clone(),
        ..Default::default()
    })
    .await?;

    run_triggered(&trigger_source, &drainer, &config.drain).await?;

    info!("Drainer stopped gracefully");
    Ok(())
}
