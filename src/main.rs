pub mod config;
pub mod mqtt;
pub mod parser;
pub mod relay;
pub mod sensor;
pub mod source;

use crate::config::{Config, RelayMode, SourceKind};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use mqtt::{BrokerConnection, LoggingObserver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Relays sensor readings from a serial device or a synthetic generator to an MQTT broker.
#[derive(Debug, Parser)]
#[command(name = "sensor-relay", version)]
struct Cli {
    /// Configuration file; the per-user default is created when missing.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    #[arg(long, value_enum)]
    mode: Option<RelayMode>,

    /// Broker host name or address.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let cli = Cli::parse();

    let config = load_config(&cli).await?;
    let source = config.build_source();
    info!(
        "Relaying {} lines from {} to {}",
        config.relay.mode,
        source.name(),
        config.mqtt.broker_address()
    );

    let interrupt = CancellationToken::new();
    let signal_token = interrupt.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let connection = BrokerConnection::new(config.mqtt.clone(), Arc::new(LoggingObserver));
    let report = relay::run(
        source,
        config.build_parser(),
        Box::new(connection),
        config.relay_settings(),
        interrupt,
    )
    .await;

    info!("Relay finished: {}", report.stats);
    match report.into_result() {
        Ok(_) => {
            info!("Shutting down sensor relay. Goodbye.");
            Ok(())
        }
        Err(e) => Err(eyre!("Relay stopped: {}", e)),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let path = Config::default_path();
            Config::ensure_default(&path).await?;
            path
        }
    };
    let mut config = Config::load(&path).await?;

    if let Some(kind) = cli.source {
        config.source = config.source.with_kind(kind);
    }
    if let Some(mode) = cli.mode {
        config.relay.mode = mode;
    }
    if let Some(host) = &cli.host {
        config.mqtt.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.mqtt.port = port;
    }
    if cli.source == Some(SourceKind::Generator) && cli.mode.is_none() {
        if config.relay.mode != RelayMode::Envelope {
            warn!("The generator only produces envelope lines, switching to envelope mode");
        }
        config.relay.mode = RelayMode::Envelope;
    }

    config.validate()?;
    Ok(config)
}
