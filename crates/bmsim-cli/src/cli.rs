//! CLI argument definitions using clap.

use std::path::PathBuf;

use bmsim_core::DEFAULT_PORT;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Reusable server connection arguments
#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Server host, or use BMSIM_HOST env var
    #[arg(long, env = "BMSIM_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port, or use BMSIM_PORT env var
    #[arg(short, long, env = "BMSIM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connect and request timeout in seconds
    #[arg(short = 'T', long, default_value = "5")]
    pub timeout: f64,
}

#[derive(Parser)]
#[command(name = "bmsim")]
#[command(author, version, about = "Client and monitor for simulated BMS telemetry", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read one sensor, or every sensor if none is named
    Read {
        #[command(flatten)]
        server: ServerArgs,

        /// Sensor name
        sensor: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Display device information and the sensor catalogue
    Info {
        #[command(flatten)]
        server: ServerArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Poll one or more servers, track statistics and raise alerts
    Monitor {
        /// Server address (host:port) - can be specified multiple times, or comma-separated
        #[arg(short, long = "source", value_delimiter = ',', required = true)]
        sources: Vec<String>,

        /// Alert rule such as "outdoor_air_drybulb_temperature > 40" - can be repeated
        #[arg(short, long = "alert")]
        alerts: Vec<String>,

        /// Alert when a sensor leaves a range: "<sensor>:<min>:<max>" - can be repeated
        #[arg(long = "band")]
        bands: Vec<String>,

        /// Seconds between polls
        #[arg(short, long, default_value = "1")]
        interval: f64,

        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Connect and request timeout in seconds
        #[arg(short = 'T', long, default_value = "5")]
        timeout: f64,

        /// Export readings to a CSV file when finished
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Export readings and statistics to a JSON file when finished
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_read_defaults() {
        let cli = parse(&["bmsim", "read"]);
        let Commands::Read {
            server,
            sensor,
            format,
        } = cli.command
        else {
            panic!("expected read");
        };
        assert_eq!(server.port, 47808);
        assert_eq!(server.timeout, 5.0);
        assert!(sensor.is_none());
        assert_eq!(format, OutputFormat::Text);
    }

    #[test]
    fn test_read_single_sensor_as_json() {
        let cli = parse(&["bmsim", "read", "wind_speed", "--format", "json", "-p", "47900"]);
        let Commands::Read {
            server,
            sensor,
            format,
        } = cli.command
        else {
            panic!("expected read");
        };
        assert_eq!(sensor.as_deref(), Some("wind_speed"));
        assert_eq!(format, OutputFormat::Json);
        assert_eq!(server.port, 47900);
    }

    #[test]
    fn test_monitor_sources_and_alerts() {
        let cli = parse(&[
            "bmsim",
            "monitor",
            "--source",
            "127.0.0.1:47808,127.0.0.1:47809",
            "-s",
            "bms.local:47810",
            "--alert",
            "wind_speed > 8",
            "--band",
            "outdoor_air_drybulb_temperature:10:35",
            "--duration",
            "30",
            "--csv",
            "out.csv",
        ]);
        let Commands::Monitor {
            sources,
            alerts,
            bands,
            interval,
            duration,
            csv,
            json,
            ..
        } = cli.command
        else {
            panic!("expected monitor");
        };
        assert_eq!(sources, ["127.0.0.1:47808", "127.0.0.1:47809", "bms.local:47810"]);
        assert_eq!(alerts, ["wind_speed > 8"]);
        assert_eq!(bands, ["outdoor_air_drybulb_temperature:10:35"]);
        assert_eq!(interval, 1.0);
        assert_eq!(duration, Some(30.0));
        assert_eq!(csv, Some(PathBuf::from("out.csv")));
        assert!(json.is_none());
    }

    #[test]
    fn test_monitor_requires_source() {
        assert!(Cli::try_parse_from(["bmsim", "monitor"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["bmsim", "info", "-q", "--compact"]);
        assert!(cli.quiet);
        assert!(cli.compact);
        assert!(!cli.verbose);
    }
}
