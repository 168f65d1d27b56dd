//! Shared data model for the bmsim building telemetry simulator.
//!
//! This crate holds the types used by the simulation engine, the wire
//! protocol, and the monitoring tools (bmsim-core, bmsim-service, bmsim-cli).
//!
//! # Features
//!
//! - Sensor definitions with ranges, units and update rules
//! - Ordered sensor value maps and published snapshots
//! - The default six-sensor building catalogue
//! - Catalogue validation errors
//!
//! # Example
//!
//! ```
//! use bmsim_types::{Catalogue, SensorDefinition, UpdateRule};
//!
//! let catalogue = Catalogue::new(vec![
//!     SensorDefinition::new("supply_air_temperature", "°C", 10.0, 30.0),
//!     SensorDefinition::new("fan_power", "kW", 0.0, 15.0)
//!         .with_rule(UpdateRule::derived("supply_air_temperature", 0.0, 0.01, 0.002)),
//! ])
//! .unwrap();
//!
//! assert_eq!(catalogue.len(), 2);
//! ```

pub mod catalogue;
pub mod error;
pub mod types;

pub use catalogue::{Catalogue, default_catalogue, default_definitions};
pub use error::{CatalogueError, CatalogueResult};
pub use types::{DeviceInfo, SensorDefinition, SensorReading, SensorValues, Snapshot, UpdateRule};
