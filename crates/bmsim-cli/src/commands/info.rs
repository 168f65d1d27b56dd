//! Info command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::{OutputFormat, ServerArgs};
use crate::format::{format_info_csv, format_info_text, to_json};
use crate::util::write_output;

pub async fn cmd_info(
    server: &ServerArgs,
    format: OutputFormat,
    output: Option<&PathBuf>,
    compact: bool,
) -> Result<()> {
    let client = crate::util::connect(server).await?;
    let info = client
        .device_info()
        .await
        .context("Failed to read device info")?;
    client.disconnect().await;

    let content = match format {
        OutputFormat::Json => to_json(&info, compact)?,
        OutputFormat::Text => format_info_text(&info),
        OutputFormat::Csv => format_info_csv(&info),
    };

    write_output(output, &content)?;
    Ok(())
}
