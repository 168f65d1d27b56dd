//! Simulation engine, wire protocol, client and monitor for bmsim.
//!
//! bmsim simulates the environmental and energy sensors of a building so BMS
//! client software can be tested without hardware. This crate holds
//! everything except the network server:
//!
//! # Features
//!
//! - **Sensor state engine**: bounded, correlated random walks published as
//!   consistent snapshots
//! - **Wire protocol**: newline-delimited JSON requests and responses
//! - **Telemetry client**: timeouts and a single reconnect per call
//! - **Monitor**: concurrent polling, statistics, edge-triggered alerts,
//!   CSV/JSON export
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bmsim_core::{ClientOptions, Monitor, TelemetryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TelemetryClient::connect("127.0.0.1", 47808, ClientOptions::default()).await?;
//!     println!("{:?}", client.device_info().await?);
//!
//!     let mut monitor = Monitor::new();
//!     monitor.add_source("bms", Arc::new(client))?;
//!     let report = monitor.run(Duration::from_secs(1), Duration::from_secs(10)).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod export;
pub mod mock;
pub mod monitor;
pub mod protocol;
pub mod stats;
pub mod thresholds;
pub mod traits;

pub use client::{ClientOptions, TelemetryClient};
pub use engine::{Engine, EngineConfig, SharedEngine};
pub use error::{ConnectionFailureReason, Error, Result};
pub use export::{JsonExport, StatisticsSummary};
pub use mock::MockSource;
pub use monitor::{Monitor, MonitorReading, PollGap, Report};
pub use protocol::{
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, ErrorKind, Frame, FrameReader, Payload, Request, Response,
};
pub use stats::{SourceStatistics, StatisticsRecord};
pub use thresholds::{AlertEvent, AlertRule, AlertTracker, Comparison};
pub use traits::ReadingSource;

// Re-export the data model so callers need only one dependency.
pub use bmsim_types;
pub use bmsim_types::{Catalogue, DeviceInfo, SensorDefinition, SensorReading, SensorValues, Snapshot, UpdateRule};
