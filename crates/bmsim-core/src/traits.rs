//! Trait abstractions for anything that serves sensor readings.
//!
//! This module provides the [`ReadingSource`] trait that abstracts over a
//! local [`Engine`](crate::Engine), a remote
//! [`TelemetryClient`](crate::TelemetryClient), and the
//! [`MockSource`](crate::MockSource) used in tests.

use async_trait::async_trait;

use bmsim_types::{DeviceInfo, SensorValues};

use crate::error::Result;

/// A device the monitor can poll.
///
/// # Example
///
/// ```ignore
/// use bmsim_core::{ReadingSource, Result};
///
/// async fn print_temperature<S: ReadingSource + ?Sized>(source: &S) -> Result<()> {
///     let value = source.read_value("outdoor_air_drybulb_temperature").await?;
///     println!("Temperature: {value:.1} °C");
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Read every sensor in one consistent snapshot.
    async fn read_values(&self) -> Result<SensorValues>;

    /// Read a single sensor.
    async fn read_value(&self, sensor: &str) -> Result<f64>;

    /// Read device identity and the sensor catalogue.
    async fn read_device_info(&self) -> Result<DeviceInfo>;
}
