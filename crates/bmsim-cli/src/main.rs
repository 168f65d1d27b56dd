use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bmsim_cli::cli::{Cli, Commands};
use bmsim_cli::commands::{MonitorArgs, cmd_info, cmd_monitor, cmd_read};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let output = cli.output.as_ref();
    match cli.command {
        Commands::Read {
            server,
            sensor,
            format,
        } => cmd_read(&server, sensor.as_deref(), format, output, cli.compact).await,
        Commands::Info { server, format } => cmd_info(&server, format, output, cli.compact).await,
        Commands::Monitor {
            sources,
            alerts,
            bands,
            interval,
            duration,
            timeout,
            csv,
            json,
        } => {
            cmd_monitor(MonitorArgs {
                sources,
                alerts,
                bands,
                interval,
                duration,
                timeout,
                csv,
                json,
                output,
            })
            .await
        }
    }
}
