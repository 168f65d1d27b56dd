//! CSV and JSON export of monitoring sessions.
//!
//! CSV has one row per reading:
//!
//! ```text
//! timestamp,source,sensor,value
//! 2026-01-15T08:30:00.120Z,local,wind_speed,3.1
//! ```
//!
//! JSON holds the readings plus a statistics summary:
//!
//! ```text
//! {
//!   "readings": [{"timestamp": "...", "source": "local", "sensor": "wind_speed", "value": 3.1}],
//!   "statistics": [{"source": "local", "sensor": "wind_speed", "min": 2.9, "max": 3.4, "mean": 3.1, "count": 12}]
//! }
//! ```
//!
//! Export only reads the session, so a failed write can be retried.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::monitor::{Monitor, MonitorReading};

/// CSV column names.
pub const CSV_HEADER: [&str; 4] = ["timestamp", "source", "sensor", "value"];

/// Statistics entry in the JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    /// Source label.
    pub source: String,
    /// Sensor name.
    pub sensor: String,
    /// Smallest value, if any were recorded.
    pub min: Option<f64>,
    /// Largest value, if any were recorded.
    pub max: Option<f64>,
    /// Mean value, if any were recorded.
    pub mean: Option<f64>,
    /// Number of values.
    pub count: u64,
}

/// The JSON export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonExport {
    /// Every reading, in time order.
    pub readings: Vec<MonitorReading>,
    /// One entry per source and sensor.
    pub statistics: Vec<StatisticsSummary>,
}

impl Monitor {
    /// Write every reading as CSV.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        csv.write_record(CSV_HEADER).map_err(io::Error::from)?;
        for reading in self.readings() {
            csv.serialize(reading).map_err(io::Error::from)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Write readings and statistics as pretty-printed JSON.
    pub fn export_json<W: Write>(&self, writer: W) -> Result<()> {
        let document = JsonExport {
            readings: self.readings().into_iter().cloned().collect(),
            statistics: self
                .statistics()
                .into_iter()
                .map(|r| StatisticsSummary {
                    mean: r.mean(),
                    source: r.source,
                    sensor: r.sensor,
                    min: r.min,
                    max: r.max,
                    count: r.count,
                })
                .collect(),
        };
        let mut writer = writer;
        serde_json::to_writer_pretty(&mut writer, &document).map_err(io::Error::from)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Write CSV to a file, replacing it if it exists.
    pub fn export_csv_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.export_csv(BufWriter::new(File::create(path)?))?;
        info!("Exported {} reading(s) to {}", self.readings().len(), path.display());
        Ok(())
    }

    /// Write JSON to a file, replacing it if it exists.
    pub fn export_json_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.export_json(BufWriter::new(File::create(path)?))?;
        info!("Exported {} reading(s) to {}", self.readings().len(), path.display());
        Ok(())
    }
}
