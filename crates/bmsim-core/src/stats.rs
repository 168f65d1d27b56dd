//! Running statistics for monitored sensors.

use serde::{Deserialize, Serialize};

use bmsim_types::SensorValues;

/// Running count, min, max and mean for one sensor of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    /// Source label.
    pub source: String,
    /// Sensor name.
    pub sensor: String,
    /// Number of values recorded.
    pub count: u64,
    /// Smallest value seen, if any.
    pub min: Option<f64>,
    /// Largest value seen, if any.
    pub max: Option<f64>,
    /// Sum of all values, for the mean.
    pub sum: f64,
    /// Number of pulls in which this sensor had no value.
    pub gaps: u64,
}

impl StatisticsRecord {
    /// An empty record.
    pub fn new(source: impl Into<String>, sensor: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sensor: sensor.into(),
            count: 0,
            min: None,
            max: None,
            sum: 0.0,
            gaps: 0,
        }
    }

    /// Add one value.
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Count a missing value.
    pub fn record_gap(&mut self) {
        self.gaps += 1;
    }

    /// Arithmetic mean, or `None` before the first value.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Statistics for every sensor of one source, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SourceStatistics {
    source: String,
    records: Vec<StatisticsRecord>,
}

impl SourceStatistics {
    /// Empty statistics for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            records: Vec::new(),
        }
    }

    /// Record every value of a pull.
    pub fn record_values(&mut self, values: &SensorValues) {
        for (sensor, value) in values.iter() {
            self.entry(sensor).record(value);
        }
    }

    /// Count a missing value for `sensor`.
    pub fn record_gap(&mut self, sensor: &str) {
        self.entry(sensor).record_gap();
    }

    /// Look up one sensor.
    pub fn get(&self, sensor: &str) -> Option<&StatisticsRecord> {
        self.records.iter().find(|r| r.sensor == sensor)
    }

    /// All records.
    pub fn records(&self) -> &[StatisticsRecord] {
        &self.records
    }

    /// Consume into the records.
    pub fn into_records(self) -> Vec<StatisticsRecord> {
        self.records
    }

    fn entry(&mut self, sensor: &str) -> &mut StatisticsRecord {
        let index = match self.records.iter().position(|r| r.sensor == sensor) {
            Some(index) => index,
            None => {
                self.records.push(StatisticsRecord::new(self.source.clone(), sensor));
                self.records.len() - 1
            }
        };
        &mut self.records[index]
    }
}
