//! TRV bridge - main entry point
//!
//! Loads configuration, wires the cloud client, radio link and MQTT session
//! together and runs the transport loop until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::sync::watch;
use tracing::{error, info};
use trv_bridge::cloud::{MiHomeClient, MiHomeConfig};
use trv_bridge::config::BridgeConfig;
use trv_bridge::error::sanitize_error_message;
use trv_bridge::observability::{init_logging, LogSettings};
use trv_bridge::radio::{self, RadioCommand, RadioHandle};
use trv_bridge::transport::{LoopOptions, MqttSession, TransportLoop};
use trv_bridge::TrvBridge;

/// Radiator valve, MQTT and cloud thermostat bridge
#[derive(Parser)]
#[command(name = "trv-bridge")]
#[command(about = "Bridge between radiator valves, an MQTT bus and a cloud thermostat")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TRV_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

const RADIO_QUEUE_CAPACITY: usize = 64;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_logging(&LogSettings::from_env().with_verbosity(cli.verbose));

    info!("Starting TRV bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", sanitize_error_message(&e.to_string()));
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for path_str in ["trv-bridge.toml", "config/trv-bridge.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BridgeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create trv-bridge.toml".into())
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        devices = config.trvs.len(),
        broker = %config.mqtt.broker_url,
        "Bridge configuration loaded"
    );

    let (username, token) = config.get_cloud_credentials()?;
    let cloud = MiHomeClient::new(MiHomeConfig::from_section(&config.cloud, username, token))?;

    let (radio, handle) = radio::channel(RADIO_QUEUE_CAPACITY);
    tokio::spawn(drive_radio(handle));

    let mut bridge = TrvBridge::new(&config, cloud, radio)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut transport = TransportLoop::new(
        MqttSession::new(config.mqtt.clone()),
        LoopOptions::from_config(&config.mqtt),
        shutdown_rx,
    );

    bridge.start(transport.outbox_mut()).await;

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => info!("Received {}, shutting down gracefully...", signal),
            Err(e) => error!("Failed to listen for shutdown signals: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Bridge is running");
    transport.run(&mut bridge).await?;
    Ok(())
}

/// Stand-in radio driver: logs what the bridge asks of the radio.
/// Holding the handle keeps the reading channel open.
async fn drive_radio(mut handle: RadioHandle) {
    while let Some(command) = handle.next_command().await {
        match command {
            RadioCommand::SetSetpoint {
                radio_id,
                temperature,
            } => info!(radio_id, temperature, "Radio setpoint command"),
            RadioCommand::Switch {
                house_code,
                index,
                on,
            } => info!(house_code, index, on, "Radio switch command"),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(devices = config.trvs.len(), "Configuration validation complete");
    Ok(())
}
