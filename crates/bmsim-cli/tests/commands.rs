//! Command tests against a live server.

use std::sync::Arc;
use std::time::Duration;

use bmsim_cli::cli::{OutputFormat, ServerArgs};
use bmsim_cli::commands::{MonitorArgs, cmd_info, cmd_read, run_monitor};
use bmsim_core::{Engine, EngineConfig, SharedEngine};
use bmsim_service::{ServerOptions, TelemetryServer};
use tokio_util::sync::CancellationToken;

async fn serve(seed: u64) -> (SharedEngine, TelemetryServer) {
    let engine = Arc::new(Engine::with_default_catalogue(EngineConfig::default().seed(seed)).unwrap());
    engine.start(Duration::from_millis(20)).unwrap();
    let server = TelemetryServer::listen(engine.clone(), "127.0.0.1", 0, ServerOptions::default())
        .await
        .unwrap();
    (engine, server)
}

fn server_args(server: &TelemetryServer) -> ServerArgs {
    ServerArgs {
        host: "127.0.0.1".to_string(),
        port: server.local_addr().port(),
        timeout: 2.0,
    }
}

fn monitor_args(sources: Vec<String>) -> MonitorArgs<'static> {
    MonitorArgs {
        sources,
        alerts: Vec::new(),
        bands: Vec::new(),
        interval: 0.05,
        duration: Some(0.3),
        timeout: 2.0,
        csv: None,
        json: None,
        output: None,
    }
}

#[tokio::test]
async fn test_read_all_as_json_to_file() {
    let (engine, server) = serve(1).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("read.json");

    cmd_read(&server_args(&server), None, OutputFormat::Json, Some(&path), true)
        .await
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text).unwrap();
    let names: Vec<_> = values.keys().cloned().collect();
    let mut expected: Vec<_> = engine.catalogue().names().map(String::from).collect();
    expected.sort();
    assert_eq!(names, expected);

    server.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn test_read_unknown_sensor_fails() {
    let (engine, server) = serve(2).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("read.txt");

    let err = cmd_read(&server_args(&server), Some("pressure"), OutputFormat::Text, Some(&path), false)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("pressure"));
    assert!(!path.exists());

    server.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn test_info_csv() {
    let (engine, server) = serve(3).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("info.csv");

    cmd_info(&server_args(&server), OutputFormat::Csv, Some(&path), false)
        .await
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 7);
    assert!(text.contains("BMS-001,Building A,wind_speed,m/s,0,9.3"));

    server.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn test_monitor_two_sources_with_exports() {
    let (engine_a, server_a) = serve(4).await;
    let (engine_b, server_b) = serve(5).await;
    let dir = tempfile::tempdir().unwrap();

    let source_a = format!("127.0.0.1:{}", server_a.local_addr().port());
    let source_b = format!("127.0.0.1:{}", server_b.local_addr().port());
    let mut args = monitor_args(vec![source_a.clone(), source_b.clone()]);
    // Always breached, so each source alerts exactly once.
    args.alerts = vec!["total_electric_energy > -1".to_string()];
    args.bands = vec!["wind_speed:-2:100".to_string()];
    args.csv = Some(dir.path().join("session.csv"));
    args.json = Some(dir.path().join("session.json"));

    let (monitor, report) = run_monitor(args, CancellationToken::new()).await.unwrap();

    assert!(report.cycles >= 2);
    assert_eq!(monitor.thresholds().len(), 3);
    assert_eq!(report.alerts.len(), 2);
    assert!(report.gaps.is_empty());
    assert_eq!(report.statistics.len(), 12);

    let csv = std::fs::read_to_string(dir.path().join("session.csv")).unwrap();
    assert!(csv.starts_with("timestamp,source,sensor,value\n"));
    assert!(csv.contains(&source_a));
    assert!(csv.contains(&source_b));

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("session.json")).unwrap()).unwrap();
    assert_eq!(json["statistics"].as_array().unwrap().len(), 12);

    for (engine, server) in [(engine_a, server_a), (engine_b, server_b)] {
        server.stop().await;
        engine.stop().await;
    }
}

#[tokio::test]
async fn test_monitor_stops_on_cancel() {
    let (engine, server) = serve(6).await;
    let mut args = monitor_args(vec![format!("127.0.0.1:{}", server.local_addr().port())]);
    args.duration = None;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let (_, report) = tokio::time::timeout(Duration::from_secs(5), run_monitor(args, cancel))
        .await
        .expect("monitor ignored cancellation")
        .unwrap();
    assert!(report.cycles >= 1);

    server.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn test_monitor_rejects_bad_arguments() {
    let bad_alert = MonitorArgs {
        alerts: vec!["wind_speed >> 3".to_string()],
        ..monitor_args(vec!["127.0.0.1:1".to_string()])
    };
    assert!(run_monitor(bad_alert, CancellationToken::new()).await.is_err());

    let bad_source = monitor_args(vec!["not-an-address".to_string()]);
    assert!(run_monitor(bad_source, CancellationToken::new()).await.is_err());

    let zero_interval = MonitorArgs {
        interval: 0.0,
        ..monitor_args(vec!["127.0.0.1:1".to_string()])
    };
    assert!(run_monitor(zero_interval, CancellationToken::new()).await.is_err());
}
