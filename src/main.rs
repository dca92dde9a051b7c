//! TTN Bridge - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use ttn_bridge::bridge::{handler_fn, BridgeHandle};
use ttn_bridge::config::{BridgeConfig, ConfigError, ConfigOverrides};
use ttn_bridge::error::sanitize_error_message;
use ttn_bridge::observability::init_default_logging;
use ttn_bridge::{Bridge, EngineState};

const DEFAULT_CONFIG_PATHS: &[&str] = &["ttn-bridge.toml", "config/ttn-bridge.toml"];

/// Bridge between The Things Network MQTT server and local handlers
#[derive(Parser)]
#[command(name = "ttn-bridge")]
#[command(about = "Bridge between The Things Network MQTT server and local handlers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cluster region, e.g. eu1
    #[arg(long, env = "TTN_REGION", global = true)]
    region: Option<String>,

    /// Application user id, e.g. my-app@ttn
    #[arg(long, env = "TTN_USER_ID", global = true)]
    user_id: Option<String>,

    /// API key
    #[arg(long, env = "TTN_ACCESS_KEY", global = true, hide_env_values = true)]
    access_key: Option<String>,

    /// Target device for downlinks read from stdin
    #[arg(long, env = "TTN_DEVICE_ID", global = true)]
    device_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and bridge until SIGINT/SIGTERM or connection loss
    Run {
        /// Send each line read from stdin as a downlink to the configured device
        #[arg(long)]
        stdin_downlinks: bool,
    },
    /// Validate configuration
    Config {
        /// Print the effective configuration, access key masked
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting TTN bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", sanitize_error_message(&e.to_string()));
            process::exit(1);
        }
    };
    config.apply_overrides(ConfigOverrides {
        region: cli.region,
        user_id: cli.user_id,
        access_key: cli.access_key,
        device_id: cli.device_id,
    });

    let result = match cli.command {
        Commands::Run { stdin_downlinks } => run_bridge(config, stdin_downlinks).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", sanitize_error_message(&e.to_string()));
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Explicit path, then the default locations; no file at all is fine when
/// everything comes from the command line or environment
fn load_configuration(config_path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return BridgeConfig::load_from_file(path);
    }

    for path in DEFAULT_CONFIG_PATHS.iter().map(Path::new) {
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return BridgeConfig::load_from_file(path);
        }
    }

    info!("No configuration file found, using command line and environment only");
    Ok(BridgeConfig::default())
}

async fn run_bridge(
    config: BridgeConfig,
    stdin_downlinks: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let params = config.broker_params()?;
    let device_id = config.device_id()?;

    let mut bridge = Bridge::mqtt(params)?;
    bridge.on_message(handler_fn(|message| {
        info!(
            topic = %message.topic(),
            device_id = message.device_id().unwrap_or("-"),
            decoded = ?message.decoded_payload(),
            "Uplink received"
        );
        Ok(())
    }));

    bridge.start().await?;

    if stdin_downlinks {
        tokio::spawn(forward_stdin(bridge.handle(), device_id));
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut state_rx = bridge.handle().subscribe_state();

    info!("Bridge is running, waiting for uplinks");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = state_rx.wait_for(|state| matches!(state, EngineState::Failed(_))) => {
            error!("MQTT connection lost, shutting down bridge...");
        }
    }

    bridge.stop();
    let result = bridge.join().await;

    let metrics = bridge.metrics();
    info!(
        sent = metrics.downlinks.sent,
        failed = metrics.downlinks.failed,
        received = metrics.uplinks.received,
        "Bridge finished"
    );

    Ok(result?)
}

/// Each non-empty stdin line becomes one downlink
async fn forward_stdin(handle: BridgeHandle, device_id: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                if let Err(e) = handle.publish(&device_id, line.trim_end().as_bytes()).await {
                    warn!(error = %e, "Failed to queue downlink");
                }
            }
            Ok(None) => {
                info!("Stdin closed, no more downlinks will be read");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
