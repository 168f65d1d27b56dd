//! Integration tests for the sensor state engine.
//!
//! These run the engine the way the server does: shared behind an `Arc`, with
//! the periodic task publishing while other tasks read.

use std::sync::Arc;
use std::time::Duration;

use bmsim_core::{Engine, EngineConfig, Error};
use bmsim_types::Catalogue;
use bmsim_types::catalogue::{OUTDOOR_AIR_DRYBULB_TEMPERATURE, TOTAL_ELECTRIC_ENERGY};
use proptest::prelude::*;

fn seeded(seed: u64) -> Engine {
    Engine::with_default_catalogue(EngineConfig::default().seed(seed)).unwrap()
}

#[tokio::test]
async fn test_fresh_engine_energy_in_range() {
    let engine = seeded(11);
    engine.start(Duration::from_millis(100)).unwrap();

    let reading = engine.read_one(TOTAL_ELECTRIC_ENERGY).unwrap();
    assert!((0.0..=600.0).contains(&reading.value));
    assert!(matches!(
        engine.read_one("pressure"),
        Err(Error::UnknownSensor(name)) if name == "pressure"
    ));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_see_whole_snapshots() {
    let engine = Arc::new(seeded(5));
    engine.start(Duration::from_millis(1)).unwrap();
    let catalogue = Catalogue::default();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let catalogue = catalogue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let snapshot = engine.read_all().unwrap();
                    assert_eq!(snapshot.values.len(), catalogue.len());
                    for def in catalogue.definitions() {
                        let value = snapshot.get(&def.name).unwrap();
                        assert!(def.contains(value), "{} = {}", def.name, value);
                    }
                    seen.push(snapshot);
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();

    let mut all = Vec::new();
    for reader in readers {
        let seen = reader.await.unwrap();
        for pair in seen.windows(2) {
            assert!(pair[0].revision <= pair[1].revision);
        }
        all.extend(seen);
    }
    engine.stop().await;

    // Two reads of the same revision are the same snapshot.
    for a in &all {
        for b in all.iter().filter(|b| b.revision == a.revision) {
            assert_eq!(a.values, b.values);
            assert_eq!(a.cycle, b.cycle);
        }
    }
}

#[tokio::test]
async fn test_override_visible_to_subscribers() {
    let engine = seeded(2);
    engine.start(Duration::from_secs(60)).unwrap();
    let mut updates = engine.subscribe();
    updates.borrow_and_update();

    engine.set_override(OUTDOOR_AIR_DRYBULB_TEMPERATURE, 42.0).unwrap();
    updates.changed().await.unwrap();
    assert_eq!(
        updates.borrow().get(OUTDOOR_AIR_DRYBULB_TEMPERATURE),
        Some(42.0)
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_task() {
    let engine = seeded(9);
    engine.start(Duration::from_millis(5)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.stop().await;

    let frozen = engine.read_all().unwrap();
    assert!(frozen.cycle > 0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.read_all().unwrap().revision, frozen.revision);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No sequence of cycles and overrides takes a sensor out of range.
    #[test]
    fn values_stay_in_range(
        seed: u64,
        overrides in proptest::collection::vec((0usize..6, prop_oneof![
            Just(f64::MAX),
            Just(f64::MIN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(f64::NAN),
            -1e6f64..1e6,
        ]), 0..20),
        cycles in 1usize..200,
    ) {
        let engine = seeded(seed);
        let names: Vec<String> = engine.catalogue().names().map(String::from).collect();

        for (i, (sensor, value)) in overrides.iter().enumerate() {
            engine.set_override(&names[*sensor], *value).unwrap();
            if i % 3 == 0 {
                engine.step();
            }
        }
        for _ in 0..cycles {
            let snapshot = engine.step();
            for def in engine.metadata() {
                let value = snapshot.get(&def.name).unwrap();
                prop_assert!(def.contains(value), "{} = {}", def.name, value);
            }
        }
    }
}
