//! Parking Daemon - Occupancy tracking and broadcast server
//!
//! Accepts entry/exit reports from gate terminals over TCP and keeps every
//! connected client informed of spot changes.
//!
//! # Usage
//!
//! ```bash
//! # Start the server on the default port (8080)
//! parkd
//!
//! # Start with newline-delimited messages on another port
//! parkd start --port 9000 --framing lines
//!
//! # Load settings from a file, then override the port from the environment
//! PARKD_PORT=9100 parkd start --config /etc/parkd.toml
//!
//! # Print the resolved configuration and exit
//! parkd check-config --config /etc/parkd.toml
//!
//! # Enable debug logging (includes the status board after each request)
//! RUST_LOG=parkd=debug parkd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (stop accepting, drain clients)

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parkd::config::ServerConfig;
use parkd::server::ParkingServer;
use parkd::service::OccupancyService;
use parking_core::NUM_SPOTS;
use parking_protocol::Framing;

/// Parking daemon - multi-client spot occupancy server
#[derive(Parser, Debug)]
#[command(name = "parkd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Start,
    /// Print the resolved configuration and exit
    CheckConfig,
}

/// Settings shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
struct Settings {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, global = true)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Message framing: "raw" (one read per message) or "lines"
    #[arg(long, global = true)]
    framing: Option<Framing>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Settings {
    /// Builds the configuration: defaults, then file, then env, then flags.
    fn resolve(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };

        config
            .apply_env()
            .context("Invalid environment configuration")?;

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(framing) = self.framing {
            config.framing = framing;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => {
            let config = args.settings.resolve()?;
            println!("{config:#?}");
            Ok(())
        }
        Some(Command::Start) | None => run_server(args.settings),
    }
}

/// Runs the server (async entry point).
#[tokio::main]
async fn run_server(settings: Settings) -> Result<()> {
    init_logging(settings.verbose)?;

    let config = settings.resolve()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Parking daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let service = Arc::new(OccupancyService::new());
    let server = ParkingServer::bind(config, service, cancel_token)
        .await
        .context("Failed to start server")?;

    info!(
        addr = %server.local_addr(),
        spots = NUM_SPOTS,
        "Accepting connections"
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Parking daemon stopped");
    Ok(())
}

/// Initializes the tracing subscriber.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("parkd={level}").parse()?)
                .add_directive(format!("parking_core={level}").parse()?)
                .add_directive(format!("parking_protocol={level}").parse()?),
        )
        .init();

    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
