//! Alert rules and edge-triggered evaluation.
//!
//! An [`AlertRule`] compares one sensor against a fixed threshold. An
//! [`AlertTracker`] remembers whether each rule is currently breached and
//! raises an [`AlertEvent`] only when a rule goes from clear to breached, so a
//! sensor sitting above its limit produces one alert, not one per poll.
//!
//! # Example
//!
//! ```
//! use bmsim_core::{AlertRule, AlertTracker};
//! use bmsim_types::SensorValues;
//! use time::OffsetDateTime;
//!
//! let rule: AlertRule = "outdoor_air_drybulb_temperature > 40".parse().unwrap();
//! let mut tracker = AlertTracker::new(vec![rule]);
//!
//! let mut values = SensorValues::new();
//! values.insert("outdoor_air_drybulb_temperature", 42.0);
//! assert_eq!(tracker.evaluate("bms", &values, OffsetDateTime::now_utc()).len(), 1);
//! assert!(tracker.evaluate("bms", &values, OffsetDateTime::now_utc()).is_empty());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use bmsim_types::SensorValues;

use crate::error::{Error, Result};

/// Direction of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Breached when the value is strictly greater than the threshold.
    Above,
    /// Breached when the value is strictly less than the threshold.
    Below,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Self::Above => ">",
            Self::Below => "<",
        }
    }
}

/// A single `sensor > value` or `sensor < value` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Sensor the rule watches.
    pub sensor: String,
    /// Comparison direction.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: f64,
}

impl AlertRule {
    /// Alert when `sensor` rises above `threshold`.
    pub fn above(sensor: impl Into<String>, threshold: f64) -> Self {
        Self {
            sensor: sensor.into(),
            comparison: Comparison::Above,
            threshold,
        }
    }

    /// Alert when `sensor` falls below `threshold`.
    pub fn below(sensor: impl Into<String>, threshold: f64) -> Self {
        Self {
            sensor: sensor.into(),
            comparison: Comparison::Below,
            threshold,
        }
    }

    /// Alert when `sensor` leaves the band `[min, max]`.
    pub fn band(sensor: impl Into<String>, min: f64, max: f64) -> [Self; 2] {
        let sensor = sensor.into();
        [Self::below(sensor.clone(), min), Self::above(sensor, max)]
    }

    /// Whether `value` breaches the rule.
    pub fn is_breached(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Above => value > self.threshold,
            Comparison::Below => value < self.threshold,
        }
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.sensor, self.comparison.symbol(), self.threshold)
    }
}

impl FromStr for AlertRule {
    type Err = Error;

    /// Parse `"<sensor> > <value>"` or `"<sensor> < <value>"`.
    fn from_str(s: &str) -> Result<Self> {
        let (pos, comparison) = match (s.find('>'), s.find('<')) {
            (Some(pos), None) => (pos, Comparison::Above),
            (None, Some(pos)) => (pos, Comparison::Below),
            _ => {
                return Err(Error::invalid_config(format!(
                    "alert rule '{s}' must contain exactly one of '>' or '<'"
                )));
            }
        };

        let sensor = s[..pos].trim();
        let threshold = s[pos + 1..].trim();
        if sensor.is_empty() || sensor.contains(char::is_whitespace) {
            return Err(Error::invalid_config(format!(
                "alert rule '{s}' needs a single sensor name"
            )));
        }
        let threshold: f64 = threshold.parse().map_err(|_| {
            Error::invalid_config(format!("alert rule '{s}' has a non-numeric threshold"))
        })?;
        if !threshold.is_finite() {
            return Err(Error::invalid_config(format!(
                "alert rule '{s}' has a non-finite threshold"
            )));
        }

        Ok(Self {
            sensor: sensor.to_string(),
            comparison,
            threshold,
        })
    }
}

/// A rule crossing observed by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Label of the source the value came from.
    pub source: String,
    /// Sensor name.
    pub sensor: String,
    /// The value that crossed the threshold.
    pub value: f64,
    /// The rule that was crossed.
    pub rule: AlertRule,
    /// When the crossing was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} = {:.2} crossed '{}'",
            self.source, self.sensor, self.value, self.rule
        )
    }
}

/// Edge-trigger state for a set of rules.
#[derive(Debug, Clone, Default)]
pub struct AlertTracker {
    rules: Vec<AlertRule>,
    breached: Vec<bool>,
}

impl AlertTracker {
    /// Track `rules`, all starting clear.
    pub fn new(rules: Vec<AlertRule>) -> Self {
        let breached = vec![false; rules.len()];
        Self { rules, breached }
    }

    /// The tracked rules.
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate one pull and return the rules that just became breached.
    ///
    /// Rules whose sensor is missing from `values` keep their state.
    pub fn evaluate(&mut self, source: &str, values: &SensorValues, timestamp: OffsetDateTime) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for (rule, breached) in self.rules.iter().zip(self.breached.iter_mut()) {
            let Some(value) = values.get(&rule.sensor) else {
                continue;
            };
            let now = rule.is_breached(value);
            if now && !*breached {
                events.push(AlertEvent {
                    source: source.to_string(),
                    sensor: rule.sensor.clone(),
                    value,
                    rule: rule.clone(),
                    timestamp,
                });
            }
            *breached = now;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> SensorValues {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_rules() {
        let rule: AlertRule = "outdoor_air_drybulb_temperature > 40".parse().unwrap();
        assert_eq!(rule, AlertRule::above("outdoor_air_drybulb_temperature", 40.0));

        let rule: AlertRule = "wind_speed<0.5".parse().unwrap();
        assert_eq!(rule, AlertRule::below("wind_speed", 0.5));
        assert_eq!(rule.to_string(), "wind_speed < 0.5");
    }

    #[test]
    fn test_parse_errors() {
        for text in ["wind_speed", "wind_speed > fast", "> 4", "a b > 4", "a > 1 < 2", "a > inf"] {
            assert!(text.parse::<AlertRule>().is_err(), "{text}");
        }
    }

    #[test]
    fn test_band() {
        let [low, high] = AlertRule::band("humidity", 20.0, 80.0);
        assert!(low.is_breached(10.0));
        assert!(!low.is_breached(20.0));
        assert!(high.is_breached(90.0));
        assert!(!high.is_breached(80.0));
    }

    #[test]
    fn test_edge_triggered() {
        let mut tracker = AlertTracker::new(vec![AlertRule::above("t", 40.0)]);
        let now = OffsetDateTime::now_utc();

        assert!(tracker.evaluate("bms", &values(&[("t", 30.0)]), now).is_empty());
        let events = tracker.evaluate("bms", &values(&[("t", 42.0)]), now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 42.0);
        assert_eq!(events[0].source, "bms");
        assert!(tracker.evaluate("bms", &values(&[("t", 43.0)]), now).is_empty());

        // Missing values leave the state alone.
        assert!(tracker.evaluate("bms", &values(&[]), now).is_empty());
        assert!(tracker.evaluate("bms", &values(&[("t", 44.0)]), now).is_empty());

        // Clearing re-arms the rule.
        assert!(tracker.evaluate("bms", &values(&[("t", 35.0)]), now).is_empty());
        assert_eq!(tracker.evaluate("bms", &values(&[("t", 41.0)]), now).len(), 1);
    }

    #[test]
    fn test_breached_on_first_pull() {
        let mut tracker = AlertTracker::new(vec![AlertRule::below("w", 1.0)]);
        let events = tracker.evaluate("a", &values(&[("w", 0.2)]), OffsetDateTime::now_utc());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule.comparison, Comparison::Below);
    }
}
