/*!
 * End-to-end session with the simulated sensor feeds
 */

use sensorlink::protocol::GREETING;
use sensorlink::{
    Collector, CollectorOptions, Framing, LatestReadings, LocationFix, ReadingKind, RelayConfig,
    SimulatedSensors, StreamOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulated_sensors_stream_to_collector() {
    let config = RelayConfig {
        framing: Framing::LengthPrefixed,
        ..Default::default()
    };
    let collector = Collector::bind(
        "127.0.0.1:0",
        CollectorOptions {
            framing: Framing::LengthPrefixed,
            ack: Some("OK".to_string()),
        },
    )
    .await
    .unwrap();
    let port = collector.local_addr().unwrap().port();
    let server = tokio::spawn(async move { collector.collect_one().await });

    let sensors = SimulatedSensors::spawn(&config, (48.8566, 2.3522));
    let board = Arc::new(LatestReadings::new());
    let mut updates = board.subscribe();
    let orchestrator = StreamOrchestrator::new(sensors.producer_set(), board.clone(), config);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.start_and_wait("127.0.0.1", port),
    )
    .await
    .expect("session did not finish");
    tokio_test::assert_ok!(result);

    let collected = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(collected.frames.len(), 4);
    assert_eq!(collected.frames[0].as_ref(), GREETING);

    let fix: LocationFix = serde_json::from_slice(&collected.frames[1]).unwrap();
    assert!((fix.latitude - 48.8566).abs() < 1e-3);
    assert!((fix.longitude - 2.3522).abs() < 1e-3);

    let motion: serde_json::Value = serde_json::from_slice(&collected.frames[2]).unwrap();
    assert!(motion["acceleration"]["z"].as_f64().unwrap() < -0.9);

    // 16x12 map of f32
    assert_eq!(collected.frames[3].len(), 16 * 12 * 4);

    let first = updates.recv().await.unwrap();
    assert_eq!(first.kind, ReadingKind::Location);
    assert!(board.latest(ReadingKind::Ranging).is_some());
    assert!(board.latest(ReadingKind::Imagery).is_none());
}
