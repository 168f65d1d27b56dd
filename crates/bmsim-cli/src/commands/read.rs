//! Read command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bmsim_core::SensorValues;
use tracing::debug;

use crate::cli::{OutputFormat, ServerArgs};
use crate::format::{
    csv_escape, format_value_text, format_values_csv, format_values_text, to_json,
};
use crate::util::write_output;

pub async fn cmd_read(
    server: &ServerArgs,
    sensor: Option<&str>,
    format: OutputFormat,
    output: Option<&PathBuf>,
    compact: bool,
) -> Result<()> {
    let client = crate::util::connect(server).await?;

    let content = match sensor {
        Some(name) => {
            let value = client
                .read_sensor(name)
                .await
                .with_context(|| format!("Failed to read {}", name))?;
            match format {
                OutputFormat::Json => {
                    let mut one = SensorValues::new();
                    one.insert(name, value);
                    to_json(&one, compact)?
                }
                OutputFormat::Csv => format!("sensor,value\n{},{}\n", csv_escape(name), value),
                OutputFormat::Text => {
                    // Units come from the catalogue; a failure here only loses the unit.
                    let unit = match client.device_info().await {
                        Ok(info) => info.sensor(name).map(|d| d.unit.clone()),
                        Err(e) => {
                            debug!("No device info for units: {}", e);
                            None
                        }
                    };
                    format_value_text(name, value, unit.as_deref())
                }
            }
        }
        None => {
            let values = client
                .read_all_sensors()
                .await
                .context("Failed to read sensors")?;
            match format {
                OutputFormat::Json => to_json(&values, compact)?,
                OutputFormat::Csv => format_values_csv(&values),
                OutputFormat::Text => {
                    let info = client.device_info().await.ok();
                    format_values_text(&values, info.as_ref())
                }
            }
        }
    };

    client.disconnect().await;
    write_output(output, &content)?;
    Ok(())
}
