//! Integration tests for the monitor against a live engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bmsim_core::{AlertRule, Engine, EngineConfig, Error, Monitor, MonitorReading, ReadingSource};
use bmsim_types::catalogue::OUTDOOR_AIR_DRYBULB_TEMPERATURE;

/// An engine that is running but will not cycle during the test, so values
/// only change through overrides.
fn frozen_engine() -> Arc<Engine> {
    let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default().seed(21)).unwrap());
    engine.start(Duration::from_secs(3600)).unwrap();
    engine
}

#[tokio::test]
async fn test_alert_fires_once_per_crossing() {
    let engine = frozen_engine();
    let mut monitor = Monitor::new();
    monitor.add_source("bms", engine.clone()).unwrap();
    monitor.add_threshold("outdoor_air_drybulb_temperature > 40".parse().unwrap());

    assert!(monitor.poll_once().await.is_empty());

    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 42.0).unwrap();
    monitor.poll_once().await;
    monitor.poll_once().await;
    monitor.poll_once().await;

    let alerts = monitor.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sensor, OUTDOOR_AIR_DRYBULB_TEMPERATURE);
    assert_eq!(alerts[0].value, 42.0);
    assert_eq!(alerts[0].rule, AlertRule::above(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 40.0));

    // Dropping below the threshold re-arms the rule.
    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 30.0).unwrap();
    monitor.poll_once().await;
    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 42.0).unwrap();
    monitor.poll_once().await;
    assert_eq!(monitor.alerts().len(), 2);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_alerts_once_on_override() {
    let engine = frozen_engine();
    let mut monitor = Monitor::new();
    monitor.add_source("bms", engine.clone()).unwrap();
    monitor.add_threshold(AlertRule::above(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 40.0));

    // Pulls land at 0, 100, 200, 300 and 400ms; the override lands between
    // the second and third.
    let overrider = engine.clone();
    let injector = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        overrider.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 42.0).unwrap();
    });

    let report = monitor
        .run(Duration::from_millis(100), Duration::from_millis(450))
        .await
        .unwrap();
    injector.await.unwrap();

    assert_eq!(report.cycles, 5);
    assert!(report.gaps.is_empty());
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].sensor, OUTDOOR_AIR_DRYBULB_TEMPERATURE);
    assert_eq!(report.alerts[0].value, 42.0);

    engine.stop().await;
}

#[tokio::test]
async fn test_unstarted_engine_polls_as_gaps() {
    let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default()).unwrap());
    let mut monitor = Monitor::new();
    monitor.add_source("bms", engine.clone()).unwrap();

    monitor.poll_once().await;
    monitor.poll_once().await;

    let gaps = monitor.gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps.iter().all(|g| g.sensor.is_none()));
    assert_eq!(gaps[0].reason, Error::NotRunning.to_string());
    assert!(!Error::NotRunning.is_transport());

    // Once the engine publishes, polling recovers.
    engine.step();
    monitor.poll_once().await;
    assert_eq!(monitor.readings().len(), 6);
}

#[tokio::test]
async fn test_band_rules() {
    let engine = frozen_engine();
    let mut monitor = Monitor::new();
    monitor.add_source("bms", engine.clone()).unwrap();
    for rule in AlertRule::band(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 10.0, 35.0) {
        monitor.add_threshold(rule);
    }

    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 6.0).unwrap();
    monitor.poll_once().await;
    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 40.0).unwrap();
    monitor.poll_once().await;

    let alerts = monitor.alerts();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].value, 6.0);
    assert_eq!(alerts[1].value, 40.0);

    engine.stop().await;
}

#[tokio::test]
async fn test_csv_export_matches_statistics() {
    let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default().seed(3)).unwrap());
    engine.start(Duration::from_millis(10)).unwrap();

    let mut monitor = Monitor::new();
    monitor.add_source("bms", engine.clone()).unwrap();
    let report = monitor
        .run(Duration::from_millis(20), Duration::from_millis(150))
        .await
        .unwrap();
    engine.stop().await;
    assert!(report.cycles >= 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.csv");
    monitor.export_csv_to_path(&path).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), ["timestamp", "source", "sensor", "value"]);

    let mut per_sensor: HashMap<String, Vec<f64>> = HashMap::new();
    for row in reader.deserialize::<MonitorReading>() {
        let row = row.unwrap();
        assert_eq!(row.source, "bms");
        per_sensor.entry(row.sensor).or_default().push(row.value);
    }

    assert_eq!(per_sensor.len(), 6);
    for record in &report.statistics {
        let values = &per_sensor[&record.sensor];
        assert_eq!(values.len() as u64, record.count);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        assert_eq!(Some(min), record.min);
        assert_eq!(Some(max), record.max);
        assert!((mean - record.mean().unwrap()).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_engine_as_reading_source() {
    let engine = frozen_engine();
    let source: Arc<dyn ReadingSource> = engine.clone();
    let info = source.read_device_info().await.unwrap();
    assert!(info.running);
    assert_eq!(info.sensors.len(), 6);
    engine.stop().await;
}
