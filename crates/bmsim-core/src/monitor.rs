//! Polling monitor with statistics and alerts.
//!
//! A [`Monitor`] pulls readings from any number of [`ReadingSource`]s on a
//! fixed interval. Every source gets its own polling loop that owns that
//! source's statistics, alert state, readings and gaps; the loops run
//! concurrently inside the caller's task and are joined when the session ends.
//!
//! A failed pull never ends the session. It is recorded as a [`PollGap`] and
//! logged. Transport failures are warned about a few times and then go quiet;
//! any other failure is logged once as an error.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bmsim_core::{AlertRule, Engine, EngineConfig, Monitor};
//!
//! #[tokio::main]
//! async fn main() -> bmsim_core::Result<()> {
//!     let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default())?);
//!     engine.start(Duration::from_millis(50))?;
//!
//!     let mut monitor = Monitor::new();
//!     monitor.add_source("local", engine.clone())?;
//!     monitor.add_threshold("outdoor_air_drybulb_temperature > 40".parse()?);
//!
//!     let report = monitor.run(Duration::from_millis(50), Duration::from_millis(200)).await?;
//!     println!("{report}");
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::stats::{SourceStatistics, StatisticsRecord};
use crate::thresholds::{AlertEvent, AlertRule, AlertTracker};
use crate::traits::ReadingSource;

/// One recorded sensor value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReading {
    /// When the pull completed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Source label.
    pub source: String,
    /// Sensor name.
    pub sensor: String,
    /// Observed value.
    pub value: f64,
}

/// A pull, or one sensor within a pull, that produced no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollGap {
    /// Source label.
    pub source: String,
    /// Poll cycle of that source, starting at 1.
    pub cycle: u64,
    /// The missing sensor, or `None` when the whole pull failed.
    pub sensor: Option<String>,
    /// When the gap was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// What went wrong.
    pub reason: String,
}

/// Summary of a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Poll cycles completed by the busiest source.
    pub cycles: u64,
    /// Per-source, per-sensor statistics.
    pub statistics: Vec<StatisticsRecord>,
    /// Alerts raised, in time order.
    pub alerts: Vec<AlertEvent>,
    /// Gaps recorded, in time order.
    pub gaps: Vec<PollGap>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Monitoring report: {} cycle(s)", self.cycles)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<12} {:<34} {:>6} {:>10} {:>10} {:>10} {:>5}",
            "SOURCE", "SENSOR", "COUNT", "MIN", "MAX", "MEAN", "GAPS"
        )?;
        for record in &self.statistics {
            let fmt_opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
            writeln!(
                f,
                "{:<12} {:<34} {:>6} {:>10} {:>10} {:>10} {:>5}",
                record.source,
                record.sensor,
                record.count,
                fmt_opt(record.min),
                fmt_opt(record.max),
                fmt_opt(record.mean()),
                record.gaps
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Alerts: {}", self.alerts.len())?;
        for alert in &self.alerts {
            writeln!(f, "  {} {}", format_time(alert.timestamp), alert)?;
        }

        writeln!(f)?;
        write!(f, "Gaps: {}", self.gaps.len())?;
        for gap in &self.gaps {
            writeln!(f)?;
            write!(
                f,
                "  {} [{}] cycle {} {}: {}",
                format_time(gap.timestamp),
                gap.source,
                gap.cycle,
                gap.sensor.as_deref().unwrap_or("(all sensors)"),
                gap.reason
            )?;
        }
        Ok(())
    }
}

fn format_time(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

/// Everything one source's polling loop owns.
struct SourceSession {
    label: String,
    source: Arc<dyn ReadingSource>,
    stats: SourceStatistics,
    tracker: AlertTracker,
    alerts: Vec<AlertEvent>,
    readings: Vec<MonitorReading>,
    gaps: Vec<PollGap>,
    /// Sensors seen in earlier pulls; missing ones become gaps.
    expected: Vec<String>,
    cycles: u64,
    consecutive_failures: u32,
}

impl SourceSession {
    fn new(label: String, source: Arc<dyn ReadingSource>, rules: &[AlertRule]) -> Self {
        Self {
            stats: SourceStatistics::new(label.clone()),
            label,
            source,
            tracker: AlertTracker::new(rules.to_vec()),
            alerts: Vec::new(),
            readings: Vec::new(),
            gaps: Vec::new(),
            expected: Vec::new(),
            cycles: 0,
            consecutive_failures: 0,
        }
    }

    fn reset(&mut self, rules: &[AlertRule]) {
        *self = Self::new(self.label.clone(), Arc::clone(&self.source), rules);
    }

    async fn run_loop(&mut self, poll_interval: Duration, deadline: Option<Instant>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let until_deadline = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(until_deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut until_deadline => break,
                _ = ticker.tick() => {}
            }
            // Not inside select!: a started pull always completes.
            self.poll().await;
        }
        debug!("Polling loop for {} finished after {} cycle(s)", self.label, self.cycles);
    }

    async fn poll(&mut self) -> Vec<AlertEvent> {
        self.cycles += 1;
        let cycle = self.cycles;
        let result = self.source.read_values().await;
        let timestamp = OffsetDateTime::now_utc();

        let values = match result {
            Ok(values) => values,
            Err(e) => {
                self.consecutive_failures += 1;
                if !e.is_transport() {
                    if self.consecutive_failures == 1 {
                        error!("Polling {} failed: {} (retrying will not help)", self.label, e);
                    }
                } else if self.consecutive_failures <= 3 {
                    warn!(
                        "Failed to poll {}: {} (attempt {})",
                        self.label, e, self.consecutive_failures
                    );
                } else if self.consecutive_failures == 4 {
                    error!(
                        "Failed to poll {} after {} attempts, will continue trying silently",
                        self.label, self.consecutive_failures
                    );
                }
                for sensor in &self.expected {
                    self.stats.record_gap(sensor);
                }
                self.gaps.push(PollGap {
                    source: self.label.clone(),
                    cycle,
                    sensor: None,
                    timestamp,
                    reason: e.to_string(),
                });
                return Vec::new();
            }
        };

        if self.consecutive_failures > 0 {
            info!(
                "Polling {} recovered after {} failure(s)",
                self.label, self.consecutive_failures
            );
            self.consecutive_failures = 0;
        }
        debug!("Polled {} (cycle {}): {} value(s)", self.label, cycle, values.len());

        for sensor in &self.expected {
            if !values.contains(sensor) {
                self.stats.record_gap(sensor);
                self.gaps.push(PollGap {
                    source: self.label.clone(),
                    cycle,
                    sensor: Some(sensor.clone()),
                    timestamp,
                    reason: "sensor missing from pull".to_string(),
                });
            }
        }
        for sensor in values.names() {
            if !self.expected.iter().any(|s| s == sensor) {
                self.expected.push(sensor.to_string());
            }
        }

        self.stats.record_values(&values);
        self.readings.extend(values.iter().map(|(sensor, value)| MonitorReading {
            timestamp,
            source: self.label.clone(),
            sensor: sensor.to_string(),
            value,
        }));

        let raised = self.tracker.evaluate(&self.label, &values, timestamp);
        for alert in &raised {
            warn!("Alert: {}", alert);
        }
        self.alerts.extend(raised.iter().cloned());
        raised
    }
}

/// Polls sources, tracks statistics and raises edge-triggered alerts.
#[derive(Default)]
pub struct Monitor {
    rules: Vec<AlertRule>,
    sessions: Vec<SourceSession>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("sources", &self.sources())
            .field("rules", &self.rules)
            .finish()
    }
}

impl Monitor {
    /// An empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source under a unique label.
    pub fn add_source(&mut self, label: impl Into<String>, source: Arc<dyn ReadingSource>) -> Result<()> {
        let label = label.into();
        if self.sessions.iter().any(|s| s.label == label) {
            return Err(Error::invalid_config(format!("duplicate source label '{label}'")));
        }
        self.sessions.push(SourceSession::new(label, source, &self.rules));
        Ok(())
    }

    /// Add an alert rule. It applies to every source.
    pub fn add_threshold(&mut self, rule: AlertRule) {
        self.rules.push(rule);
        for session in &mut self.sessions {
            session.tracker = AlertTracker::new(self.rules.clone());
        }
    }

    /// Source labels in the order they were added.
    pub fn sources(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.label.as_str()).collect()
    }

    /// The alert rules.
    pub fn thresholds(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Discard all readings, statistics, alerts and gaps.
    pub fn reset(&mut self) {
        for session in &mut self.sessions {
            session.reset(&self.rules);
        }
    }

    /// Pull once from every source concurrently. Returns the alerts raised.
    ///
    /// Data accumulates across calls until [`reset`](Self::reset) or the next
    /// [`run`](Self::run).
    pub async fn poll_once(&mut self) -> Vec<AlertEvent> {
        let raised = join_all(self.sessions.iter_mut().map(|s| s.poll())).await;
        raised.into_iter().flatten().collect()
    }

    /// Run a fresh session for `duration`, pulling every `poll_interval`.
    pub async fn run(&mut self, poll_interval: Duration, duration: Duration) -> Result<Report> {
        self.run_until(poll_interval, Some(duration), CancellationToken::new())
            .await
    }

    /// Run a fresh session until `duration` elapses (if given) or `cancel`
    /// fires, whichever comes first.
    ///
    /// Cancellation is observed between pulls only.
    pub async fn run_until(
        &mut self,
        poll_interval: Duration,
        duration: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Report> {
        if poll_interval.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }
        if self.sessions.is_empty() {
            return Err(Error::invalid_config("no sources to monitor"));
        }

        self.reset();
        info!(
            "Monitoring {} source(s) every {:?}{}",
            self.sessions.len(),
            poll_interval,
            duration.map(|d| format!(" for {d:?}")).unwrap_or_default()
        );

        let deadline = duration.map(|d| Instant::now() + d);
        join_all(
            self.sessions
                .iter_mut()
                .map(|s| s.run_loop(poll_interval, deadline, cancel.clone())),
        )
        .await;

        let report = self.report();
        info!(
            "Monitoring finished: {} cycle(s), {} alert(s), {} gap(s)",
            report.cycles,
            report.alerts.len(),
            report.gaps.len()
        );
        Ok(report)
    }

    /// Every recorded reading, in time order.
    pub fn readings(&self) -> Vec<&MonitorReading> {
        let mut readings: Vec<_> = self.sessions.iter().flat_map(|s| &s.readings).collect();
        readings.sort_by_key(|r| r.timestamp);
        readings
    }

    /// Statistics for every source and sensor.
    pub fn statistics(&self) -> Vec<StatisticsRecord> {
        self.sessions
            .iter()
            .flat_map(|s| s.stats.records().iter().cloned())
            .collect()
    }

    /// Alerts raised so far, in time order.
    pub fn alerts(&self) -> Vec<AlertEvent> {
        let mut alerts: Vec<_> = self.sessions.iter().flat_map(|s| s.alerts.iter().cloned()).collect();
        alerts.sort_by_key(|a| a.timestamp);
        alerts
    }

    /// Gaps recorded so far, in time order.
    pub fn gaps(&self) -> Vec<PollGap> {
        let mut gaps: Vec<_> = self.sessions.iter().flat_map(|s| s.gaps.iter().cloned()).collect();
        gaps.sort_by_key(|g| g.timestamp);
        gaps
    }

    /// Summarise the current session.
    pub fn report(&self) -> Report {
        Report {
            cycles: self.sessions.iter().map(|s| s.cycles).max().unwrap_or(0),
            statistics: self.statistics(),
            alerts: self.alerts(),
            gaps: self.gaps(),
        }
    }
}
