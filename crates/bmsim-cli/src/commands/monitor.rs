//! Monitor command implementation.
//!
//! Connects to every source up front, then polls them concurrently until the
//! duration elapses or Ctrl-C is pressed. Alerts are logged as they happen;
//! the report and any exports are written at the end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bmsim_core::{AlertRule, Monitor, Report, TelemetryClient};
use tokio_util::sync::CancellationToken;

use crate::util::{client_options, parse_band, parse_source, seconds, write_output};

/// Arguments for the monitor command.
pub struct MonitorArgs<'a> {
    pub sources: Vec<String>,
    pub alerts: Vec<String>,
    pub bands: Vec<String>,
    pub interval: f64,
    pub duration: Option<f64>,
    pub timeout: f64,
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub output: Option<&'a PathBuf>,
}

pub async fn cmd_monitor(args: MonitorArgs<'_>) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down...");
            ctrl_c.cancel();
        }
    });

    let output = args.output;
    let (_, report) = run_monitor(args, cancel).await?;
    write_output(output, &report.to_string())?;
    Ok(())
}

/// Build the monitor, run it and export the results.
///
/// Returns the monitor so callers can inspect the session.
pub async fn run_monitor(args: MonitorArgs<'_>, cancel: CancellationToken) -> Result<(Monitor, Report)> {
    let interval = seconds(args.interval, "interval")?;
    let duration = args
        .duration
        .map(|d| seconds(d, "duration"))
        .transpose()?;
    let options = client_options(args.timeout)?;

    let mut rules = Vec::new();
    for alert in &args.alerts {
        let rule: AlertRule = alert.parse()?;
        rules.push(rule);
    }
    for band in &args.bands {
        rules.extend(parse_band(band)?);
    }

    let mut monitor = Monitor::new();
    for source in &args.sources {
        let (host, port) = parse_source(source)?;
        let client = TelemetryClient::connect(&host, port, options.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", source))?;
        monitor.add_source(source.clone(), Arc::new(client))?;
    }
    for rule in rules {
        monitor.add_threshold(rule);
    }

    let report = monitor.run_until(interval, duration, cancel).await?;

    if let Some(path) = &args.csv {
        monitor
            .export_csv_to_path(path)
            .with_context(|| format!("Failed to export CSV to {}", path.display()))?;
    }
    if let Some(path) = &args.json {
        monitor
            .export_json_to_path(path)
            .with_context(|| format!("Failed to export JSON to {}", path.display()))?;
    }

    Ok((monitor, report))
}
