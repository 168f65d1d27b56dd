//! Telemetry server for the bmsim building sensor simulator.
//!
//! The service runs one simulated device: a sensor state engine that advances
//! on a fixed interval, and a TCP server answering newline-delimited JSON
//! requests against it.
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/bmsim/server.toml`:
//!
//! ```toml
//! [device]
//! device_id = "BMS-001"
//! location = "Building A"
//! update_interval_ms = 1000
//! seed = 42
//!
//! [server]
//! host = "127.0.0.1"
//! port = 47808
//! max_frame_bytes = 65536
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bmsim_core::{Engine, EngineConfig};
//! use bmsim_service::{ServerOptions, TelemetryServer};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default())?);
//! engine.start(std::time::Duration::from_secs(1))?;
//! let server = TelemetryServer::listen(engine.clone(), "127.0.0.1", 47808, ServerOptions::default()).await?;
//! tokio::signal::ctrl_c().await?;
//! server.stop().await;
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod server;

pub use config::{Config, ConfigError, DeviceConfig, ServerConfig, ValidationError, default_config_path};
pub use server::{ServerError, ServerOptions, ServerStats, TelemetryServer};
