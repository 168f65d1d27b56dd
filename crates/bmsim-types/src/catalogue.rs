//! The sensor catalogue and its update order.
//!
//! A [`Catalogue`] is a validated list of [`SensorDefinition`]s. Validation
//! resolves every derived sensor's driver once and fixes a topological update
//! order in which each driver precedes the sensors it drives, so the engine
//! never has to look anything up by name while running a cycle.
//!
//! # Example
//!
//! ```
//! use bmsim_types::catalogue::{self, Catalogue};
//!
//! let catalogue = Catalogue::default();
//! assert_eq!(catalogue.len(), 6);
//!
//! // Energy use is derived from the outdoor temperature, so the temperature
//! // is always updated first.
//! let order: Vec<_> = catalogue
//!     .update_order()
//!     .iter()
//!     .map(|&i| catalogue.definitions()[i].name.as_str())
//!     .collect();
//! let temp = order.iter().position(|n| *n == catalogue::OUTDOOR_AIR_DRYBULB_TEMPERATURE);
//! let energy = order.iter().position(|n| *n == catalogue::TOTAL_ELECTRIC_ENERGY);
//! assert!(temp < energy);
//! ```

use std::collections::HashSet;

use crate::error::{CatalogueError, CatalogueResult};
use crate::types::{SensorDefinition, UpdateRule};

/// Cumulative electricity use.
pub const TOTAL_ELECTRIC_ENERGY: &str = "total_electric_energy";
/// Outdoor dry-bulb temperature.
pub const OUTDOOR_AIR_DRYBULB_TEMPERATURE: &str = "outdoor_air_drybulb_temperature";
/// Outdoor relative humidity.
pub const OUTDOOR_AIR_RELATIVE_HUMIDITY: &str = "outdoor_air_relative_humidity";
/// Wind speed.
pub const WIND_SPEED: &str = "wind_speed";
/// Diffuse horizontal solar radiation.
pub const DIFFUSE_SOLAR_RADIATION: &str = "diffuse_solar_radiation";
/// Direct normal solar radiation.
pub const DIRECT_SOLAR_RADIATION: &str = "direct_solar_radiation";

/// The six building sensors served by default.
///
/// Energy accumulates faster when it is hot outside and humidity falls as the
/// temperature rises; the remaining quantities walk independently.
pub fn default_definitions() -> Vec<SensorDefinition> {
    vec![
        SensorDefinition::new(TOTAL_ELECTRIC_ENERGY, "kWh", 0.0, 600.0)
            .with_initial(0.0)
            .with_rule(UpdateRule::derived(
                OUTDOOR_AIR_DRYBULB_TEMPERATURE,
                0.000_017,
                0.000_067,
                0.000_008,
            )),
        SensorDefinition::new(OUTDOOR_AIR_DRYBULB_TEMPERATURE, "°C", 5.0, 44.0)
            .with_initial(20.0)
            .with_rule(UpdateRule::random_walk(0.013)),
        SensorDefinition::new(OUTDOOR_AIR_RELATIVE_HUMIDITY, "%", 11.0, 100.0)
            .with_initial(50.0)
            .with_rule(UpdateRule::derived(
                OUTDOOR_AIR_DRYBULB_TEMPERATURE,
                0.004,
                -0.008,
                0.011,
            )),
        SensorDefinition::new(WIND_SPEED, "m/s", 0.0, 9.3)
            .with_initial(2.0)
            .with_rule(UpdateRule::random_walk(0.032)),
        SensorDefinition::new(DIFFUSE_SOLAR_RADIATION, "W/m²", 0.0, 444.0)
            .with_initial(150.0)
            .with_rule(UpdateRule::random_walk(0.0225)),
        SensorDefinition::new(DIRECT_SOLAR_RADIATION, "W/m²", 0.0, 924.0)
            .with_initial(400.0)
            .with_rule(UpdateRule::random_walk(0.0216)),
    ]
}

/// The validated built-in catalogue.
pub fn default_catalogue() -> Catalogue {
    Catalogue::default()
}

/// A validated set of sensor definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalogue {
    definitions: Vec<SensorDefinition>,
    drivers: Vec<Option<usize>>,
    update_order: Vec<usize>,
}

impl Catalogue {
    /// Validate `definitions` and compute the update order.
    pub fn new(definitions: Vec<SensorDefinition>) -> CatalogueResult<Self> {
        if definitions.is_empty() {
            return Err(CatalogueError::Empty);
        }

        let mut seen = HashSet::new();
        for def in &definitions {
            validate_definition(def)?;
            if !seen.insert(def.name.as_str()) {
                return Err(CatalogueError::DuplicateSensor(def.name.clone()));
            }
        }

        let mut drivers = Vec::with_capacity(definitions.len());
        for def in &definitions {
            let driver = match def.rule.driver() {
                None => None,
                Some(name) => Some(
                    definitions
                        .iter()
                        .position(|d| d.name == name)
                        .ok_or_else(|| CatalogueError::UnknownDriver {
                            sensor: def.name.clone(),
                            driver: name.to_string(),
                        })?,
                ),
            };
            drivers.push(driver);
        }

        let update_order = topological_order(&definitions, &drivers)?;

        Ok(Self {
            definitions,
            drivers,
            update_order,
        })
    }

    /// Definitions in catalogue order.
    pub fn definitions(&self) -> &[SensorDefinition] {
        &self.definitions
    }

    /// Indices into [`definitions`](Self::definitions) in the order sensors
    /// must be updated: every driver comes before the sensors it drives, and
    /// otherwise catalogue order is kept.
    pub fn update_order(&self) -> &[usize] {
        &self.update_order
    }

    /// Index of the sensor driving the sensor at `index`, if it is derived.
    pub fn driver_of(&self, index: usize) -> Option<usize> {
        self.drivers.get(index).copied().flatten()
    }

    /// Find a definition by name.
    pub fn get(&self, name: &str) -> Option<&SensorDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Find the index of a sensor by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.definitions.iter().position(|d| d.name == name)
    }

    /// Sensor names in catalogue order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    /// Number of sensors.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Always false for a validated catalogue.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for Catalogue {
    fn default() -> Self {
        Self::new(default_definitions()).expect("built-in catalogue is valid")
    }
}

fn validate_definition(def: &SensorDefinition) -> CatalogueResult<()> {
    if !def.min.is_finite() || !def.max.is_finite() || def.min >= def.max {
        return Err(CatalogueError::InvalidRange {
            sensor: def.name.clone(),
            min: def.min,
            max: def.max,
        });
    }
    if !def.initial.is_finite() || !def.contains(def.initial) {
        return Err(CatalogueError::InitialOutOfRange {
            sensor: def.name.clone(),
            initial: def.initial,
        });
    }

    let invalid = |reason: &str| CatalogueError::InvalidRule {
        sensor: def.name.clone(),
        reason: reason.to_string(),
    };
    let volatility = def.rule.volatility();
    if !volatility.is_finite() || volatility < 0.0 {
        return Err(invalid("volatility must be a non-negative number"));
    }
    if let UpdateRule::Derived { bias, coupling, .. } = &def.rule
        && (!bias.is_finite() || !coupling.is_finite())
    {
        return Err(invalid("bias and coupling must be finite"));
    }
    Ok(())
}

/// Order sensors so that drivers precede derived sensors, lowest index first
/// among the sensors that are ready.
fn topological_order(
    definitions: &[SensorDefinition],
    drivers: &[Option<usize>],
) -> CatalogueResult<Vec<usize>> {
    let n = definitions.len();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let ready = (0..n).find(|&i| !placed[i] && drivers[i].is_none_or(|d| placed[d]));
        match ready {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let start = (0..n).find(|&i| !placed[i]).unwrap_or(0);
                return Err(CatalogueError::DependencyCycle(cycle_from(
                    definitions,
                    drivers,
                    start,
                )));
            }
        }
    }

    Ok(order)
}

/// Follow driver links from `start` until a sensor repeats and return the
/// names along the loop, closing it with the repeated name.
fn cycle_from(definitions: &[SensorDefinition], drivers: &[Option<usize>], start: usize) -> Vec<String> {
    let mut path = vec![start];
    let mut current = start;
    while let Some(next) = drivers[current] {
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut names: Vec<String> = path[pos..]
                .iter()
                .map(|&i| definitions[i].name.clone())
                .collect();
            names.push(definitions[next].name.clone());
            return names;
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|&i| definitions[i].name.clone()).collect()
}
