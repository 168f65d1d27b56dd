//! Core types for simulated sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How a sensor's value evolves from one update cycle to the next.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum UpdateRule {
    /// Independent bounded random walk.
    ///
    /// Each cycle adds a Gaussian step with mean 0 and standard deviation
    /// `volatility * (max - min)`.
    RandomWalk {
        /// Step deviation as a fraction of the range width.
        volatility: f64,
    },
    /// A walk whose drift follows another sensor.
    ///
    /// The step mean is `(bias + coupling * level) * (max - min)` where `level`
    /// is the driver's value for the same cycle, normalised to `[0, 1]`.
    Derived {
        /// Name of the driving sensor.
        driver: String,
        /// Drift applied regardless of the driver, as a fraction of the range width.
        bias: f64,
        /// Drift per unit of normalised driver level. Negative values give an
        /// inverse correlation.
        coupling: f64,
        /// Step deviation as a fraction of the range width.
        volatility: f64,
    },
}

impl UpdateRule {
    /// Create a random-walk rule.
    pub fn random_walk(volatility: f64) -> Self {
        Self::RandomWalk { volatility }
    }

    /// Create a rule derived from `driver`.
    pub fn derived(driver: impl Into<String>, bias: f64, coupling: f64, volatility: f64) -> Self {
        Self::Derived {
            driver: driver.into(),
            bias,
            coupling,
            volatility,
        }
    }

    /// The driving sensor, if this rule has one.
    pub fn driver(&self) -> Option<&str> {
        match self {
            Self::RandomWalk { .. } => None,
            Self::Derived { driver, .. } => Some(driver),
        }
    }

    /// Step deviation as a fraction of the range width.
    pub fn volatility(&self) -> f64 {
        match self {
            Self::RandomWalk { volatility } | Self::Derived { volatility, .. } => *volatility,
        }
    }
}

impl Default for UpdateRule {
    fn default() -> Self {
        Self::RandomWalk { volatility: 0.01 }
    }
}

/// Immutable description of one simulated sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorDefinition {
    /// Unique sensor name.
    pub name: String,
    /// Unit label (e.g. `kWh`).
    pub unit: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Value published before the first update cycle.
    pub initial: f64,
    /// How the value evolves.
    pub rule: UpdateRule,
}

impl SensorDefinition {
    /// Create a definition starting at the middle of its range with the
    /// default random-walk rule.
    pub fn new(name: impl Into<String>, unit: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            min,
            max,
            initial: min + (max - min) / 2.0,
            rule: UpdateRule::default(),
        }
    }

    /// Set the initial value.
    #[must_use]
    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    /// Set the update rule.
    #[must_use]
    pub fn with_rule(mut self, rule: UpdateRule) -> Self {
        self.rule = rule;
        self
    }

    /// Width of the range.
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Check whether `value` lies within the inclusive range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp `value` into the range. NaN maps to the lower bound.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    /// Position of `value` within the range, from 0.0 (min) to 1.0 (max).
    pub fn level(&self, value: f64) -> f64 {
        let width = self.width();
        if width <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / width).clamp(0.0, 1.0)
    }
}

impl fmt::Display for SensorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}..{}] {}", self.name, self.min, self.max, self.unit)
    }
}

/// An ordered `sensor name -> value` mapping.
///
/// Entries keep insertion order, which for engine output is catalogue order.
/// Serialises as a JSON object in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorValues {
    entries: Vec<(String, f64)>,
}

impl SensorValues {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mapping with room for `capacity` sensors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace a value. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a value by sensor name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Check whether a sensor is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Iterate over sensor names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of sensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, f64)> for SensorValues {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut values = SensorValues::new();
        for (name, value) in iter {
            values.insert(name, value);
        }
        values
    }
}

#[cfg(feature = "serde")]
impl Serialize for SensorValues {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for SensorValues {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValuesVisitor;

        impl<'de> serde::de::Visitor<'de> for ValuesVisitor {
            type Value = SensorValues;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of sensor names to numbers")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut values = SensorValues::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, f64>()? {
                    values.insert(name, value);
                }
                Ok(values)
            }
        }

        deserializer.deserialize_map(ValuesVisitor)
    }
}

/// A single sensor value with the time it was read.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Sensor name.
    pub sensor: String,
    /// Observed value.
    pub value: f64,
    /// When the value was read.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

/// One fully-updated, internally consistent set of sensor values.
///
/// Snapshots are immutable once published. `cycle` counts completed update
/// cycles; `revision` increases on every publish, including manual overrides.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    /// Number of update cycles completed when this snapshot was built.
    pub cycle: u64,
    /// Publish counter.
    pub revision: u64,
    /// When the snapshot was published.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub taken_at: OffsetDateTime,
    /// Values in catalogue order.
    pub values: SensorValues,
}

impl Snapshot {
    /// Look up a value by sensor name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name)
    }
}

/// Device metadata served to clients.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Device identifier.
    pub device_id: String,
    /// Physical location label.
    pub location: String,
    /// Whether the update cycle is running.
    pub running: bool,
    /// Sensor catalogue.
    pub sensors: Vec<SensorDefinition>,
}

impl DeviceInfo {
    /// Find a sensor definition by name.
    pub fn sensor(&self, name: &str) -> Option<&SensorDefinition> {
        self.sensors.iter().find(|s| s.name == name)
    }
}
