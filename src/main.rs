//! sensehat-mqtt entry point
//!
//! Resolves configuration, then runs the session supervisor and the sample
//! loop as two tasks until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use sensehat_mqtt::config::BridgeConfig;
use sensehat_mqtt::error::{BridgeError, BridgeResult};
use sensehat_mqtt::observability::{init_logging, BridgeMetrics, LogSettings};
use sensehat_mqtt::sampler::SampleLoop;
use sensehat_mqtt::sensor::SenseHat;
use sensehat_mqtt::session::SessionManager;
use sensehat_mqtt::session_span;
use sensehat_mqtt::transport::mqtt::MqttConnector;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, Instrument};

/// Sense HAT environmental sensors to MQTT, with Home Assistant discovery
#[derive(Parser)]
#[command(name = "sensehat-mqtt")]
#[command(version)]
struct Cli {
    /// JSON options file (defaults to /data/options.json when present)
    #[arg(long, value_name = "FILE", env = "SENSEHAT_OPTIONS")]
    options: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(LogSettings::from_env().with_verbosity(cli.verbose));

    let config = match BridgeConfig::load(cli.options.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(field = e.field().unwrap_or("options"), error = %e, "Invalid configuration");
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => show_config(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e, "Bridge stopped with an error");
        process::exit(1);
    }
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        topic_prefix = %config.topics.topic_prefix,
        interval_secs = config.sensor.update_interval_secs,
        "Starting Sense HAT MQTT bridge"
    );

    // Install handlers before any task can outlive a missed signal
    let mut sigint = signal(SignalKind::interrupt()).map_err(BridgeError::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(BridgeError::Signal)?;

    let config = Arc::new(config);
    let metrics = Arc::new(BridgeMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manager = SessionManager::new(
        MqttConnector::new(Arc::clone(&config)),
        Arc::clone(&config),
        Arc::clone(&metrics),
    );
    let sampler = SampleLoop::new(
        Arc::new(SenseHat::new(config.sensor.i2c_bus)),
        manager.handle(),
        &config,
        Arc::clone(&metrics),
    );

    let session_task = tokio::spawn(
        manager
            .run(shutdown_rx.clone())
            .instrument(session_span!(client_id = %config.mqtt.client_id)),
    );
    let sampler_task = tokio::spawn(sampler.run(shutdown_rx));

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
    }

    let _ = shutdown_tx.send(true);
    for (name, task) in [("sampler", sampler_task), ("session", session_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Shutdown complete"),
        Err(_) => info!("Shutdown complete"),
    }
    Ok(())
}

fn show_config(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        match toml::to_string_pretty(&config.redacted()) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!(error = %e, "Failed to render configuration"),
        }
    }
    info!("Configuration is valid");
    Ok(())
}
