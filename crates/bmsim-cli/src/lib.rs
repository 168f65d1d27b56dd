//! Command-line client and monitor for bmsim telemetry servers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `read` | Read one sensor or every sensor |
//! | `info` | Display device information and the sensor catalogue |
//! | `monitor` | Poll several servers, collect statistics, raise alerts |
//!
//! # Output Formats
//!
//! - **Text** (default): Human-readable output
//! - **JSON**: Machine-readable JSON format
//! - **CSV**: Comma-separated values for spreadsheets and data analysis
//!
//! # Examples
//!
//! ```bash
//! bmsim read --port 47808
//! bmsim read wind_speed --format json
//! bmsim monitor -s 127.0.0.1:47808 -s 127.0.0.1:47809 \
//!     --alert "outdoor_air_drybulb_temperature > 40" --duration 60 --csv session.csv
//! ```

pub mod cli;
pub mod commands;
pub mod format;
pub mod util;
