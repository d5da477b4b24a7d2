//! usbip-vhc CLI
//!
//! Thin command-line front end over the `engine` crate: attaches a
//! remote usbip device, holds the session open, and detaches cleanly on
//! Ctrl-C. There is no persistent daemon behind this process, so
//! `attach` is the one subcommand that does anything meaningful stood
//! alone — `detach`/`list` against an already-running session would
//! need an IPC layer the spec leaves out of scope.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::setup_logging;
use engine::{AttachOptions, CompletionSink, CompletionStatus, DeviceLocation, Engine, EngineConfig, NullHubDelegate};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbip-vhc")]
#[command(author, version, about = "USB/IP virtual host controller CLI")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach a remote device, hold the session open, detach on Ctrl-C.
    Attach {
        /// Remote host name or IP address
        host: String,
        /// Remote usbip-host port
        #[arg(default_value = "3240")]
        port: String,
        /// Remote bus id, e.g. "1-1"
        busid: String,
    },
}

/// Logs every transfer completion at the level its status warrants.
struct LoggingCompletionSink;

impl CompletionSink for LoggingCompletionSink {
    fn complete(&self, local_handle: u64, status: CompletionStatus, actual_length: u32, _payload: Vec<u8>) {
        match status {
            CompletionStatus::Ok => info!(local_handle, actual_length, "transfer completed"),
            CompletionStatus::Error(code) => warn!(local_handle, code, "transfer failed"),
            CompletionStatus::Cancelled => info!(local_handle, "transfer cancelled"),
            CompletionStatus::Stalled => warn!(local_handle, "transfer stalled"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::CliConfig::default();
        let path = config::CliConfig::default_path();
        config.save(&path).context("failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::CliConfig::load(Some(path.clone())).context("failed to load configuration")?
    } else {
        config::CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.client.log_level);
    setup_logging(log_level).context("failed to set up logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "usbip-vhc starting");

    let Some(command) = args.command else {
        println!("no command given; try `usbip-vhc attach <host> <busid>` or --help");
        return Ok(());
    };

    match command {
        Command::Attach { host, port, busid } => attach_and_hold(host, port, busid, &config).await,
    }
}

async fn attach_and_hold(host: String, port: String, busid: String, config: &config::CliConfig) -> Result<()> {
    let engine_config = EngineConfig {
        port_count: config.hub.port_count,
        default_connect_timeout: config.connect_timeout(),
    };
    let engine = Engine::new(engine_config, Arc::new(NullHubDelegate));
    let location = DeviceLocation::new(host, port, busid);
    let options = AttachOptions {
        connect_timeout: config.connect_timeout(),
    };

    let attached_port = engine
        .attach(location.clone(), options, Arc::new(LoggingCompletionSink))
        .await
        .with_context(|| format!("failed to attach {location}"))?;
    info!(port = attached_port, %location, "attached");

    for device in engine.list() {
        info!(
            port = device.port,
            vendor_id = device.vendor_id,
            product_id = device.product_id,
            "imported device"
        );
    }

    info!("holding session open, press Ctrl-C to detach and exit");
    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    info!("detaching...");
    engine.detach(attached_port as i32).await;
    Ok(())
}
