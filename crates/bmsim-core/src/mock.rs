//! Mock reading source for testing.
//!
//! [`MockSource`] implements [`ReadingSource`] without an engine or a network,
//! so monitor behaviour can be tested against exact values.
//!
//! # Features
//!
//! - **Scripted values**: queue pulls that are returned in order
//! - **Failure injection**: fail every read, or only the next few
//! - **Latency simulation**: delay each read

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bmsim_types::{Catalogue, DeviceInfo, SensorValues};

use crate::error::{Error, Result};
use crate::traits::ReadingSource;

/// A fake device serving fixed or scripted values.
///
/// # Example
///
/// ```
/// use bmsim_core::{MockSource, ReadingSource};
///
/// #[tokio::main]
/// async fn main() {
///     let source = MockSource::new("MOCK-1");
///     source.set_value("wind_speed", 4.0).await;
///     assert_eq!(source.read_value("wind_speed").await.unwrap(), 4.0);
///
///     source.set_should_fail(true, Some("offline")).await;
///     assert!(source.read_values().await.is_err());
/// }
/// ```
pub struct MockSource {
    info: RwLock<DeviceInfo>,
    current: RwLock<SensorValues>,
    script: RwLock<VecDeque<SensorValues>>,
    read_count: AtomicU32,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
    /// Number of reads that still fail before reads succeed again.
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSource")
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockSource {
    /// Create a mock serving the built-in catalogue at its initial values.
    pub fn new(device_id: &str) -> Self {
        let catalogue = Catalogue::default();
        let current = catalogue
            .definitions()
            .iter()
            .map(|d| (d.name.clone(), d.initial))
            .collect();
        Self::with_values(device_id, current, catalogue)
    }

    /// Create a mock serving `values` for the given catalogue.
    pub fn with_values(device_id: &str, values: SensorValues, catalogue: Catalogue) -> Self {
        Self {
            info: RwLock::new(DeviceInfo {
                device_id: device_id.to_string(),
                location: "Test bench".to_string(),
                running: true,
                sensors: catalogue.definitions().to_vec(),
            }),
            current: RwLock::new(values),
            script: RwLock::new(VecDeque::new()),
            read_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
            read_latency_ms: AtomicU64::new(0),
            remaining_failures: AtomicU32::new(0),
        }
    }

    async fn check_should_fail(&self) -> Result<()> {
        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        // Transient failures are consumed first.
        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::connection_lost(self.fail_message.read().await.clone()));
        }

        if self.should_fail.load(Ordering::Relaxed) {
            Err(Error::connection_lost(self.fail_message.read().await.clone()))
        } else {
            Ok(())
        }
    }

    /// Advance the script if anything is queued and return the current values.
    async fn next_values(&self) -> SensorValues {
        if let Some(next) = self.script.write().await.pop_front() {
            *self.current.write().await = next;
        }
        self.current.read().await.clone()
    }

    // --- Test control methods ---

    /// Replace every value.
    pub async fn set_values(&self, values: SensorValues) {
        *self.current.write().await = values;
    }

    /// Set one value.
    pub async fn set_value(&self, sensor: &str, value: f64) {
        self.current.write().await.insert(sensor, value);
    }

    /// Queue pulls returned by successive reads. Once the queue is empty the
    /// last pull keeps being returned.
    pub async fn push_script(&self, pulls: impl IntoIterator<Item = SensorValues>) {
        self.script.write().await.extend(pulls);
    }

    /// Make every read fail (or succeed again).
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Fail the next `count` reads, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Set simulated read latency. `Duration::ZERO` disables it.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of reads attempted.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReadingSource for MockSource {
    async fn read_values(&self) -> Result<SensorValues> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.check_should_fail().await?;
        Ok(self.next_values().await)
    }

    async fn read_value(&self, sensor: &str) -> Result<f64> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.check_should_fail().await?;
        self.current
            .read()
            .await
            .get(sensor)
            .ok_or_else(|| Error::unknown_sensor(sensor))
    }

    async fn read_device_info(&self) -> Result<DeviceInfo> {
        self.check_should_fail().await?;
        Ok(self.info.read().await.clone())
    }
}
