//! The sensor state engine.
//!
//! An [`Engine`] owns the current state of every simulated sensor and advances
//! it on a fixed cadence. Each update cycle builds a complete new [`Snapshot`]
//! off to the side and then publishes it with a single swap, so readers always
//! see either the previous cycle or the next one, never a mix.
//!
//! Readers never wait for a cycle: [`Engine::read_all`] hands out the
//! currently published `Arc<Snapshot>`, which stays valid after later cycles
//! replace it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bmsim_core::{Engine, EngineConfig};
//! use bmsim_types::Catalogue;
//!
//! #[tokio::main]
//! async fn main() -> bmsim_core::Result<()> {
//!     let engine = Engine::new(EngineConfig::default(), Catalogue::default())?;
//!     engine.start(Duration::from_secs(1))?;
//!
//!     let snapshot = engine.read_all()?;
//!     let energy = snapshot.get("total_electric_energy").unwrap();
//!     assert!((0.0..=600.0).contains(&energy));
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use bmsim_types::{
    Catalogue, DeviceInfo, SensorDefinition, SensorReading, SensorValues, Snapshot, UpdateRule,
};

use crate::error::{Error, Result};
use crate::traits::ReadingSource;

/// An engine shared between the server, the monitor and the caller.
pub type SharedEngine = Arc<Engine>;

/// Identity and behaviour settings for an [`Engine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Device identifier reported in [`DeviceInfo`].
    pub device_id: String,
    /// Physical location label reported in [`DeviceInfo`].
    pub location: String,
    /// Fixed RNG seed. `None` seeds from the operating system.
    pub seed: Option<u64>,
    /// Clamp out-of-range overrides into range instead of rejecting them.
    pub clamp_overrides: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: "BMS-001".to_string(),
            location: "Building A".to_string(),
            seed: None,
            clamp_overrides: true,
        }
    }
}

impl EngineConfig {
    /// Set the device identifier.
    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Set the location label.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Use a fixed RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Choose between clamping and rejecting out-of-range overrides.
    #[must_use]
    pub fn clamp_overrides(mut self, clamp: bool) -> Self {
        self.clamp_overrides = clamp;
        self
    }
}

/// Mutable state touched only by writers (cycles and overrides).
struct WriterState {
    rng: StdRng,
    /// Sensors whose next step is skipped because they were just overridden.
    pinned: Vec<bool>,
}

struct EngineInner {
    config: EngineConfig,
    catalogue: Catalogue,
    writer: Mutex<WriterState>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    /// Set once the initial snapshot has been published.
    published: AtomicBool,
    running: AtomicBool,
}

struct CycleTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The simulated BMS device.
pub struct Engine {
    inner: Arc<EngineInner>,
    task: Mutex<Option<CycleTask>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device_id", &self.inner.config.device_id)
            .field("sensors", &self.inner.catalogue.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Engine {
    /// Create an engine for a validated catalogue.
    ///
    /// Sensor values start at each definition's `initial` value. Nothing is
    /// published until the first [`start`](Self::start), [`step`](Self::step)
    /// or [`set_override`](Self::set_override).
    pub fn new(config: EngineConfig, catalogue: Catalogue) -> Result<Self> {
        if config.device_id.trim().is_empty() {
            return Err(Error::invalid_config("device_id must not be empty"));
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let initial = Snapshot {
            cycle: 0,
            revision: 0,
            taken_at: OffsetDateTime::now_utc(),
            values: catalogue
                .definitions()
                .iter()
                .map(|d| (d.name.clone(), d.initial))
                .collect(),
        };
        let (snapshot, _) = watch::channel(Arc::new(initial));

        Ok(Self {
            inner: Arc::new(EngineInner {
                writer: Mutex::new(WriterState {
                    rng,
                    pinned: vec![false; catalogue.len()],
                }),
                config,
                catalogue,
                snapshot,
                published: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    /// Create an engine serving the built-in building catalogue.
    pub fn with_default_catalogue(config: EngineConfig) -> Result<Self> {
        Self::new(config, Catalogue::default())
    }

    /// Start the periodic update cycle.
    ///
    /// Publishes the initial snapshot if nothing has been published yet. The
    /// first cycle runs one `interval` after this call. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::invalid_config("update interval must be > 0"));
        }

        let mut task = lock(&self.task);
        if task.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.inner.ensure_published();
        self.inner.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.run_cycle();
                    }
                }
            }
            debug!("Update task for {} exited", inner.config.device_id);
        });

        *task = Some(CycleTask { cancel, handle });
        info!(
            "Engine {} started ({} sensors, every {:?})",
            self.inner.config.device_id,
            self.inner.catalogue.len(),
            interval
        );
        Ok(())
    }

    /// Stop the update cycle and wait for the task to exit.
    ///
    /// A cycle that is already computing always completes and publishes. The
    /// last snapshot stays readable. Calling `stop` on a stopped engine does
    /// nothing.
    pub async fn stop(&self) {
        let Some(task) = lock(&self.task).take() else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!("Update task ended abnormally: {}", e);
        }
        self.inner.running.store(false, Ordering::SeqCst);
        info!("Engine {} stopped", self.inner.config.device_id);
    }

    /// Whether the periodic cycle is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run exactly one update cycle now and return the published snapshot.
    pub fn step(&self) -> Arc<Snapshot> {
        self.inner.ensure_published();
        self.inner.run_cycle()
    }

    /// The current snapshot.
    ///
    /// Fails with [`Error::NotRunning`] until something has been published.
    /// [`step`](Self::step) and [`set_override`](Self::set_override) publish
    /// too, so an engine driven by hand is readable without ever being
    /// started. After [`stop`](Self::stop) the last snapshot stays readable.
    pub fn read_all(&self) -> Result<Arc<Snapshot>> {
        self.inner.current()
    }

    /// The current value of one sensor, stamped with the read time.
    pub fn read_one(&self, name: &str) -> Result<SensorReading> {
        if self.inner.catalogue.index_of(name).is_none() {
            return Err(Error::unknown_sensor(name));
        }
        let snapshot = self.inner.current()?;
        let value = snapshot
            .get(name)
            .ok_or_else(|| Error::unknown_sensor(name))?;
        Ok(SensorReading {
            sensor: name.to_string(),
            value,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Force a sensor to a value.
    ///
    /// The value is clamped into range unless clamping is disabled in
    /// [`EngineConfig`], in which case out-of-range values are rejected. The
    /// new value is published immediately and survives the next cycle
    /// unchanged; after that the sensor evolves normally again.
    ///
    /// Returns the value actually stored.
    pub fn set_override(&self, name: &str, value: f64) -> Result<f64> {
        let index = self
            .inner
            .catalogue
            .index_of(name)
            .ok_or_else(|| Error::unknown_sensor(name))?;
        let def = &self.inner.catalogue.definitions()[index];

        let stored = if self.inner.config.clamp_overrides {
            def.clamp(value)
        } else if def.contains(value) {
            value
        } else {
            return Err(Error::OutOfRange {
                sensor: name.to_string(),
                value,
                min: def.min,
                max: def.max,
            });
        };

        let mut writer = lock(&self.inner.writer);
        let current = self.inner.snapshot.borrow().clone();
        let mut values = current.values.clone();
        values.insert(name, stored);
        writer.pinned[index] = true;
        self.inner.publish(current.cycle, values);
        self.inner.published.store(true, Ordering::SeqCst);
        drop(writer);

        debug!("Override {} = {} (requested {})", name, stored, value);
        Ok(stored)
    }

    /// Sensor definitions in catalogue order.
    pub fn metadata(&self) -> &[SensorDefinition] {
        self.inner.catalogue.definitions()
    }

    /// The validated catalogue.
    pub fn catalogue(&self) -> &Catalogue {
        &self.inner.catalogue
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Device metadata, including the running flag.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.inner.config.device_id.clone(),
            location: self.inner.config.location.clone(),
            running: self.is_running(),
            sensors: self.inner.catalogue.definitions().to_vec(),
        }
    }

    /// Watch published snapshots.
    ///
    /// The receiver holds the initial values until the first publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot.subscribe()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.cancel.cancel();
        }
    }
}

impl EngineInner {
    fn current(&self) -> Result<Arc<Snapshot>> {
        if !self.published.load(Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        Ok(self.snapshot.borrow().clone())
    }

    fn ensure_published(&self) {
        let _writer = lock(&self.writer);
        if self.published.load(Ordering::SeqCst) {
            return;
        }
        let current = self.snapshot.borrow().clone();
        self.publish(current.cycle, current.values.clone());
        self.published.store(true, Ordering::SeqCst);
    }

    /// Advance every sensor once and publish the result.
    fn run_cycle(&self) -> Arc<Snapshot> {
        let mut writer = lock(&self.writer);
        let current = self.snapshot.borrow().clone();
        let values = self.next_values(&current.values, &mut writer);
        let snapshot = self.publish(current.cycle + 1, values);
        drop(writer);

        trace!(
            cycle = snapshot.cycle,
            revision = snapshot.revision,
            "Published {:?}",
            snapshot.values
        );
        snapshot
    }

    fn next_values(&self, current: &SensorValues, writer: &mut WriterState) -> SensorValues {
        let defs = self.catalogue.definitions();
        let mut values: Vec<f64> = defs
            .iter()
            .map(|d| current.get(&d.name).unwrap_or(d.initial))
            .collect();

        for &index in self.catalogue.update_order() {
            if std::mem::take(&mut writer.pinned[index]) {
                continue;
            }

            let def = &defs[index];
            let width = def.width();
            let mean = match &def.rule {
                UpdateRule::RandomWalk { .. } => 0.0,
                UpdateRule::Derived { bias, coupling, .. } => {
                    let level = self
                        .catalogue
                        .driver_of(index)
                        .map(|driver| defs[driver].level(values[driver]))
                        .unwrap_or(0.0);
                    (bias + coupling * level) * width
                }
            };
            let step = gaussian(&mut writer.rng, mean, def.rule.volatility() * width);
            values[index] = def.clamp(values[index] + step);
        }

        defs.iter()
            .zip(values)
            .map(|(d, v)| (d.name.clone(), v))
            .collect()
    }

    /// Swap in a new snapshot. Callers hold the writer lock.
    fn publish(&self, cycle: u64, values: SensorValues) -> Arc<Snapshot> {
        let revision = self.snapshot.borrow().revision + 1;
        let snapshot = Arc::new(Snapshot {
            cycle,
            revision,
            taken_at: OffsetDateTime::now_utc(),
            values,
        });
        self.snapshot.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}

fn gaussian(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    match Normal::new(mean, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ReadingSource for Engine {
    async fn read_values(&self) -> Result<SensorValues> {
        Ok(self.read_all()?.values.clone())
    }

    async fn read_value(&self, sensor: &str) -> Result<f64> {
        Ok(self.read_one(sensor)?.value)
    }

    async fn read_device_info(&self) -> Result<DeviceInfo> {
        Ok(self.device_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmsim_types::catalogue::{OUTDOOR_AIR_DRYBULB_TEMPERATURE, TOTAL_ELECTRIC_ENERGY, WIND_SPEED};

    fn seeded() -> Engine {
        Engine::with_default_catalogue(EngineConfig::default().seed(7)).unwrap()
    }

    fn still(name: &str, min: f64, max: f64, initial: f64) -> SensorDefinition {
        SensorDefinition::new(name, "u", min, max)
            .with_initial(initial)
            .with_rule(UpdateRule::random_walk(0.0))
    }

    #[test]
    fn test_reads_fail_before_start() {
        let engine = seeded();
        assert!(matches!(engine.read_all(), Err(Error::NotRunning)));
        assert!(matches!(engine.read_one(WIND_SPEED), Err(Error::NotRunning)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_manual_step_publishes_without_start() {
        let engine = seeded();
        engine.step();
        assert!(engine.read_all().is_ok());
        assert!(!engine.is_running());

        let engine = seeded();
        engine.set_override(WIND_SPEED, 2.0).unwrap();
        assert_eq!(engine.read_one(WIND_SPEED).unwrap().value, 2.0);
    }

    #[test]
    fn test_unknown_sensor() {
        let engine = seeded();
        engine.step();
        assert!(matches!(engine.read_one("pressure"), Err(Error::UnknownSensor(_))));
        assert!(matches!(
            engine.set_override("pressure", 1.0),
            Err(Error::UnknownSensor(_))
        ));
    }

    #[test]
    fn test_step_advances_cycle_and_revision() {
        let engine = seeded();
        let first = engine.step();
        let second = engine.step();
        assert_eq!(first.cycle, 1);
        assert_eq!(second.cycle, 2);
        assert!(second.revision > first.revision);
        assert_eq!(engine.read_all().unwrap().revision, second.revision);
    }

    #[test]
    fn test_values_stay_in_range() {
        let engine = seeded();
        for _ in 0..500 {
            let snapshot = engine.step();
            for def in engine.metadata() {
                let value = snapshot.get(&def.name).unwrap();
                assert!(def.contains(value), "{} = {}", def.name, value);
            }
        }
    }

    #[test]
    fn test_same_seed_same_values() {
        let a = seeded();
        let b = seeded();
        for _ in 0..10 {
            assert_eq!(a.step().values, b.step().values);
        }
    }

    #[test]
    fn test_snapshot_keeps_catalogue_order() {
        let engine = seeded();
        let snapshot = engine.step();
        let names: Vec<_> = snapshot.values.names().collect();
        let expected: Vec<_> = engine.catalogue().names().collect();
        assert_eq!(names, expected);
        assert_eq!(names[0], TOTAL_ELECTRIC_ENERGY);
    }

    #[test]
    fn test_override_clamps() {
        let engine = seeded();
        let stored = engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 100.0).unwrap();
        assert_eq!(stored, 44.0);
        assert_eq!(
            engine.read_one(OUTDOOR_AIR_DRYBULB_TEMPERATURE).unwrap().value,
            44.0
        );

        let stored = engine.set_override(WIND_SPEED, f64::NEG_INFINITY).unwrap();
        assert_eq!(stored, 0.0);
    }

    #[test]
    fn test_override_rejects_when_not_clamping() {
        let engine =
            Engine::with_default_catalogue(EngineConfig::default().seed(1).clamp_overrides(false)).unwrap();
        let err = engine.set_override(WIND_SPEED, 12.0).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { max, .. } if max == 9.3));
        assert_eq!(engine.set_override(WIND_SPEED, 5.0).unwrap(), 5.0);
    }

    #[test]
    fn test_override_survives_one_cycle() {
        let catalogue = Catalogue::new(vec![
            SensorDefinition::new("walk", "u", 0.0, 100.0)
                .with_initial(50.0)
                .with_rule(UpdateRule::random_walk(0.05)),
        ])
        .unwrap();
        let engine = Engine::new(EngineConfig::default().seed(3), catalogue).unwrap();

        let before = engine.set_override("walk", 12.5).unwrap();
        let revision = engine.read_all().unwrap().revision;
        let after_one = engine.step();
        assert_eq!(after_one.get("walk"), Some(before));
        assert!(after_one.revision > revision);

        let after_two = engine.step();
        assert_ne!(after_two.get("walk"), Some(before));
    }

    #[test]
    fn test_derived_sensor_follows_driver() {
        let catalogue = Catalogue::new(vec![
            SensorDefinition::new("load", "kW", 0.0, 100.0)
                .with_initial(0.0)
                .with_rule(UpdateRule::derived("heat", 0.0, 0.01, 0.0)),
            still("heat", 0.0, 10.0, 10.0),
        ])
        .unwrap();
        let engine = Engine::new(EngineConfig::default().seed(0), catalogue).unwrap();

        // Driver pinned at its maximum: each cycle adds coupling * width.
        for cycle in 1..=5 {
            let snapshot = engine.step();
            let load = snapshot.get("load").unwrap();
            assert!((load - cycle as f64).abs() < 1e-9, "cycle {cycle}: {load}");
        }
    }

    #[test]
    fn test_inverse_coupling_falls() {
        let catalogue = Catalogue::new(vec![
            still("heat", 0.0, 10.0, 10.0),
            SensorDefinition::new("humidity", "%", 0.0, 100.0)
                .with_initial(50.0)
                .with_rule(UpdateRule::derived("heat", 0.0, -0.02, 0.0)),
        ])
        .unwrap();
        let engine = Engine::new(EngineConfig::default().seed(0), catalogue).unwrap();
        let snapshot = engine.step();
        assert!((snapshot.get("humidity").unwrap() - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_device_info() {
        let engine = Engine::with_default_catalogue(
            EngineConfig::default().device_id("BMS-042").location("Plant room"),
        )
        .unwrap();
        let info = engine.device_info();
        assert_eq!(info.device_id, "BMS-042");
        assert_eq!(info.location, "Plant room");
        assert!(!info.running);
        assert_eq!(info.sensors.len(), 6);
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let result = Engine::with_default_catalogue(EngineConfig::default().device_id(" "));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_publishes_initial_snapshot() {
        let engine = seeded();
        engine.start(Duration::from_secs(60)).unwrap();

        let snapshot = engine.read_all().unwrap();
        assert_eq!(snapshot.cycle, 0);
        assert_eq!(snapshot.get(TOTAL_ELECTRIC_ENERGY), Some(0.0));
        assert_eq!(snapshot.get(OUTDOOR_AIR_DRYBULB_TEMPERATURE), Some(20.0));
        assert!(engine.is_running());
        assert!(engine.device_info().running);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let engine = seeded();
        engine.start(Duration::from_secs(60)).unwrap();
        assert!(matches!(
            engine.start(Duration::from_secs(60)),
            Err(Error::AlreadyRunning)
        ));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let engine = seeded();
        assert!(matches!(
            engine.start(Duration::ZERO),
            Err(Error::InvalidConfig(_))
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cycles() {
        let engine = seeded();
        let mut updates = engine.subscribe();
        engine.start(Duration::from_millis(100)).unwrap();
        updates.borrow_and_update();

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().cycle, 1);
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().cycle, 2);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_keeps_last_snapshot() {
        let engine = seeded();
        engine.start(Duration::from_secs(60)).unwrap();
        engine.step();
        engine.stop().await;
        engine.stop().await;

        assert!(!engine.is_running());
        assert_eq!(engine.read_all().unwrap().cycle, 1);

        engine.start(Duration::from_secs(60)).unwrap();
        assert_eq!(engine.read_all().unwrap().cycle, 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_reading_source_impl() {
        let engine = seeded();
        engine.step();
        let source: &dyn ReadingSource = &engine;
        let values = source.read_values().await.unwrap();
        assert_eq!(values.len(), 6);
        let wind = source.read_value(WIND_SPEED).await.unwrap();
        assert_eq!(Some(wind), values.get(WIND_SPEED));
        assert_eq!(source.read_device_info().await.unwrap().device_id, "BMS-001");
    }
}
