//! bmsim service - simulated BMS device with a TCP telemetry server.
//!
//! Run with: `cargo run -p bmsim-service`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bmsim_core::Engine;
use bmsim_service::{Config, TelemetryServer, default_config_path};

/// Simulated building sensors served over TCP.
#[derive(Parser, Debug)]
#[command(name = "bmsim-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind (overrides config).
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Milliseconds between update cycles (overrides config).
    #[arg(short, long, global = true)]
    interval_ms: Option<u64>,

    /// RNG seed for a reproducible run (overrides config).
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the simulator and server in the foreground (default behavior).
    Run,

    /// Write the effective configuration to a file.
    InitConfig {
        /// Destination (defaults to the standard config path).
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::InitConfig { path }) => {
            let path = path.unwrap_or_else(default_config_path);
            config.save(&path)?;
            println!("Wrote configuration to {}", path.display());
            Ok(())
        }
        Some(Command::Run) | None => run(config).await,
    }
}

/// Load the configuration file and apply command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.device.update_interval_ms = interval_ms;
    }
    if let Some(seed) = args.seed {
        config.device.seed = Some(seed);
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::with_default_catalogue(config.device.engine_config())?);
    engine.start(config.device.update_interval())?;

    let server = match TelemetryServer::listen(
        Arc::clone(&engine),
        &config.server.host,
        config.server.port,
        config.server.options(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            engine.stop().await;
            return Err(e.into());
        }
    };

    info!(
        "Serving {} ({}) on {}",
        config.device.device_id,
        config.device.location,
        server.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    server.stop().await;
    engine.stop().await;

    let stats = server.stats();
    info!(
        "Served {} request(s) over {} connection(s), {} bad",
        stats.requests_served, stats.total_connections, stats.bad_requests
    );
    Ok(())
}
