//! Error types for catalogue validation in bmsim-types.

use thiserror::Error;

/// Errors that can occur when building a sensor catalogue.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CatalogueError {
    /// The catalogue has no sensors.
    #[error("catalogue contains no sensors")]
    Empty,

    /// Two definitions share the same name.
    #[error("duplicate sensor name '{0}'")]
    DuplicateSensor(String),

    /// The range is empty, inverted, or not finite.
    #[error("sensor '{sensor}' has an invalid range [{min}, {max}]")]
    InvalidRange {
        /// The offending sensor.
        sensor: String,
        /// Lower bound as configured.
        min: f64,
        /// Upper bound as configured.
        max: f64,
    },

    /// The initial value lies outside the range.
    #[error("sensor '{sensor}' starts at {initial}, outside its range")]
    InitialOutOfRange {
        /// The offending sensor.
        sensor: String,
        /// The configured initial value.
        initial: f64,
    },

    /// A rule parameter is negative or not finite.
    #[error("sensor '{sensor}' has an invalid update rule: {reason}")]
    InvalidRule {
        /// The offending sensor.
        sensor: String,
        /// What is wrong with the rule.
        reason: String,
    },

    /// A derived sensor names a driver that is not in the catalogue.
    #[error("sensor '{sensor}' is driven by unknown sensor '{driver}'")]
    UnknownDriver {
        /// The derived sensor.
        sensor: String,
        /// The missing driver name.
        driver: String,
    },

    /// Derived sensors form a cycle, so no update order exists.
    #[error("derived sensors form a dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
}

/// Result type alias using bmsim-types' CatalogueError type.
pub type CatalogueResult<T> = std::result::Result<T, CatalogueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalogueError::DuplicateSensor("wind_speed".to_string());
        assert_eq!(err.to_string(), "duplicate sensor name 'wind_speed'");

        let err = CatalogueError::UnknownDriver {
            sensor: "load".to_string(),
            driver: "pressure".to_string(),
        };
        assert!(err.to_string().contains("pressure"));

        let err = CatalogueError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
