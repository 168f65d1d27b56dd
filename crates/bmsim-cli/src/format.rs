//! Output formatting for text, JSON, and CSV output.

use std::fmt::Write;

use anyhow::Result;
use bmsim_core::{DeviceInfo, SensorValues};
use serde::Serialize;

/// Serialise any value as JSON, pretty-printed unless `compact`.
pub fn to_json<T: Serialize + ?Sized>(value: &T, compact: bool) -> Result<String> {
    let mut json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    json.push('\n');
    Ok(json)
}

/// One sensor value as text, with its unit when known.
pub fn format_value_text(sensor: &str, value: f64, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{sensor}: {value:.2} {unit}\n"),
        None => format!("{sensor}: {value:.2}\n"),
    }
}

/// All sensor values as an aligned table.
///
/// Units are looked up in `info` when it is given.
pub fn format_values_text(values: &SensorValues, info: Option<&DeviceInfo>) -> String {
    let width = values.names().map(str::len).max().unwrap_or(0);
    let mut out = String::new();
    for (name, value) in values.iter() {
        let unit = info
            .and_then(|i| i.sensor(name))
            .map(|d| d.unit.as_str())
            .unwrap_or("");
        let _ = writeln!(out, "{name:<width$}  {value:>10.2} {unit}");
    }
    out
}

/// All sensor values as `sensor,value` rows.
pub fn format_values_csv(values: &SensorValues) -> String {
    let mut out = String::from("sensor,value\n");
    for (name, value) in values.iter() {
        let _ = writeln!(out, "{name},{value}");
    }
    out
}

/// Device identity and the sensor catalogue.
pub fn format_info_text(info: &DeviceInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Device:   {}", info.device_id);
    let _ = writeln!(out, "Location: {}", info.location);
    let _ = writeln!(out, "Running:  {}", if info.running { "yes" } else { "no" });
    let _ = writeln!(out, "Sensors:  {}", info.sensors.len());

    let width = info.sensors.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for def in &info.sensors {
        let _ = writeln!(
            out,
            "  {:<width$}  {:>8} .. {:<8} {}",
            def.name, def.min, def.max, def.unit
        );
    }
    out
}

/// The sensor catalogue as CSV.
pub fn format_info_csv(info: &DeviceInfo) -> String {
    let mut out = String::from("device_id,location,sensor,unit,min,max\n");
    for def in &info.sensors {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            csv_escape(&info.device_id),
            csv_escape(&info.location),
            def.name,
            csv_escape(&def.unit),
            def.min,
            def.max
        );
    }
    out
}

/// Quote a CSV field if it contains a delimiter, quote or newline.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
