//! Shared helpers for command implementations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bmsim_core::{AlertRule, ClientOptions, TelemetryClient};

use crate::cli::ServerArgs;

/// Client options with both timeouts set to `timeout_secs`.
pub fn client_options(timeout_secs: f64) -> Result<ClientOptions> {
    let timeout = seconds(timeout_secs, "timeout")?;
    Ok(ClientOptions::default()
        .connect_timeout(timeout)
        .request_timeout(timeout))
}

/// Connect to the server named on the command line.
pub async fn connect(server: &ServerArgs) -> Result<TelemetryClient> {
    let options = client_options(server.timeout)?;
    TelemetryClient::connect(&server.host, server.port, options)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", server.host, server.port))
}

/// Split a `host:port` source address.
///
/// The last colon separates the port, so bracketed IPv6 addresses work:
/// `[::1]:47808`.
pub fn parse_source(source: &str) -> Result<(String, u16)> {
    let Some((host, port)) = source.rsplit_once(':') else {
        bail!("Invalid source '{}': expected host:port", source);
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Invalid source '{}': host is empty", source);
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid port in source '{}'", source))?;
    if port == 0 {
        bail!("Invalid source '{}': port cannot be 0", source);
    }
    Ok((host.to_string(), port))
}

/// Parse `<sensor>:<min>:<max>` into a pair of rules alerting outside the range.
pub fn parse_band(band: &str) -> Result<[AlertRule; 2]> {
    let parts: Vec<&str> = band.split(':').map(str::trim).collect();
    let &[sensor, min, max] = parts.as_slice() else {
        bail!("Invalid band '{}': expected <sensor>:<min>:<max>", band);
    };
    if sensor.is_empty() {
        bail!("Invalid band '{}': sensor is empty", band);
    }
    let min: f64 = min
        .parse()
        .with_context(|| format!("Invalid minimum in band '{}'", band))?;
    let max: f64 = max
        .parse()
        .with_context(|| format!("Invalid maximum in band '{}'", band))?;
    if !(min.is_finite() && max.is_finite() && min < max) {
        bail!("Invalid band '{}': need finite min < max", band);
    }
    Ok(AlertRule::band(sensor, min, max))
}

/// Convert a positive number of seconds from the command line.
pub fn seconds(value: f64, what: &str) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        bail!("{} must be a positive number of seconds, got {}", what, value);
    }
    Duration::try_from_secs_f64(value).with_context(|| format!("{} is out of range", what))
}

/// Write content to a file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(parse_source("127.0.0.1:47808").unwrap(), ("127.0.0.1".to_string(), 47808));
        assert_eq!(parse_source("bms.local:1").unwrap(), ("bms.local".to_string(), 1));
        assert_eq!(parse_source("[::1]:47900").unwrap(), ("::1".to_string(), 47900));
    }

    #[test]
    fn test_parse_source_errors() {
        for bad in ["localhost", ":47808", "host:", "host:http", "host:70000", "host:0"] {
            assert!(parse_source(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_band() {
        let [low, high] = parse_band("wind_speed:1:8.5").unwrap();
        assert_eq!(low, AlertRule::below("wind_speed", 1.0));
        assert_eq!(high, AlertRule::above("wind_speed", 8.5));
    }

    #[test]
    fn test_parse_band_errors() {
        for bad in ["wind_speed", "wind_speed:1", ":1:2", "w:x:2", "w:5:1", "w:1:inf"] {
            assert!(parse_band(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(0.25, "interval").unwrap(), Duration::from_millis(250));
        assert!(seconds(0.0, "interval").is_err());
        assert!(seconds(-1.0, "interval").is_err());
        assert!(seconds(f64::NAN, "interval").is_err());
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello\n");
    }
}
