use std::sync::Arc;

use pulse_sim::{DelayedEvent, Engine, EngineConfig, EngineHandle, EventKind};
use rstest::rstest;
use tokio::time::{Duration, Instant};

use crate::types::{
    FakeTransport, MemoryScenarioSource, PausedClock, Reply, always_click_scenario, candidate,
};

async fn start(
    transport: &Arc<FakeTransport>,
    source: &Arc<MemoryScenarioSource>,
    snapshot_path: &std::path::Path,
) -> EngineHandle {
    Engine::builder()
        .config(
            EngineConfig::builder()
                .seed(11)
                .snapshot_path(snapshot_path)
                .build(),
        )
        .transport(transport.clone())
        .scenario_source(source.clone())
        .clock(Arc::new(PausedClock::night()))
        .build()
        .start()
        .await
}

#[tokio::test]
#[rstest]
#[timeout(Duration::from_secs(5))]
async fn shut_down_stops_dispatching() {
    tokio::time::pause();

    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(FakeTransport::no_fill());
    let source = Arc::new(MemoryScenarioSource::with(always_click_scenario("stop")));
    let engine = start(&transport, &source, &dir.path().join("queue.json")).await;

    tokio::time::sleep(Duration::from_secs(10)).await;

    tokio::time::timeout(Duration::from_secs(1), engine.shut_down())
        .await
        .expect("Engine should shut down");

    let sent = transport.request_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.request_count(), sent);
}

#[tokio::test]
#[rstest]
#[timeout(Duration::from_secs(5))]
async fn dropping_the_handle_aborts_the_loops() {
    tokio::time::pause();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let transport = Arc::new(FakeTransport::no_fill());
    let source = Arc::new(MemoryScenarioSource::with(always_click_scenario("drop")));
    let engine = start(&transport, &source, &path).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    drop(engine);

    let sent = transport.request_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.request_count(), sent);
    assert!(!path.exists(), "nothing is persisted without a graceful shutdown");
}

/// Given served ads still in flight when the engine is stopped
/// When it shuts down
/// Then shutdown waits for them, records their outcome and schedules nothing from them
#[tokio::test(start_paused = true)]
async fn shut_down_records_requests_still_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let transport = Arc::new(FakeTransport::with_latency(
        Reply::Status(200, Some(candidate())),
        Duration::from_secs(5),
    ));
    let source = Arc::new(MemoryScenarioSource::with(always_click_scenario("slow")));
    let engine = start(&transport, &source, &path).await;
    let stats = Arc::clone(engine.stats());
    let scheduler = Arc::clone(engine.scheduler());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent = transport.request_count() as u64;
    assert!(sent > 0);
    assert_eq!(stats.snapshot().total("/ad/get"), 0, "nothing has completed yet");

    let stopping = Instant::now();
    engine.shut_down().await;
    assert!(stopping.elapsed() >= Duration::from_secs(3));

    assert_eq!(stats.snapshot().count("/ad/get", 200), sent);
    assert!(scheduler.queue().is_empty());
    let persisted: Vec<DelayedEvent> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(persisted.is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.request_count() as u64, sent);
    assert!(transport.pixels().is_empty());
}

/// Given a request slower than the request timeout
/// When the engine shuts down
/// Then shutdown stops waiting after the timeout, and the late outcome is still recorded
#[tokio::test(start_paused = true)]
async fn shut_down_abandons_requests_past_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(FakeTransport::with_latency(
        Reply::Status(200, None),
        Duration::from_secs(60),
    ));
    let source = Arc::new(MemoryScenarioSource::with(always_click_scenario("stuck")));
    let engine = start(&transport, &source, &dir.path().join("queue.json")).await;
    let stats = Arc::clone(engine.stats());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent = transport.request_count() as u64;
    assert!(sent > 0);

    let stopping = Instant::now();
    engine.shut_down().await;
    let waited = stopping.elapsed();
    assert!(waited >= Duration::from_secs(10), "waited {waited:?}");
    assert!(waited < Duration::from_secs(60), "waited {waited:?}");
    assert_eq!(stats.snapshot().total("/ad/get"), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(stats.snapshot().count("/ad/get", 200), sent);
    assert_eq!(transport.request_count() as u64, sent);
}

/// Given pending events at shutdown
/// When the engine restarts with the same snapshot path
/// Then the events are restored once, and fire when due
#[tokio::test(start_paused = true)]
async fn pending_events_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("queue.json");
    let transport = Arc::new(FakeTransport::no_fill());
    // No scenario: nothing but the events below is ever scheduled.
    let source = Arc::new(MemoryScenarioSource::default());

    let engine = start(&transport, &source, &path).await;
    engine.scheduler().enqueue(
        EventKind::Click,
        "http://ads.test/pixel/click?id=1",
        Duration::from_secs(30),
    );
    engine.scheduler().enqueue(
        EventKind::Conversion,
        "http://ads.test/pixel/conversion?id=1&value=10.00",
        Duration::from_secs(90),
    );
    engine.shut_down().await;

    let persisted: Vec<DelayedEvent> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].kind, EventKind::Click);
    assert!(persisted[0].execute_at < persisted[1].execute_at);

    let engine = start(&transport, &source, &path).await;
    assert_eq!(engine.scheduler().queue().pending(), persisted);
    assert!(!path.exists(), "the snapshot is consumed on startup");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(
        transport.pixels(),
        vec![
            "http://ads.test/pixel/click?id=1".to_string(),
            "http://ads.test/pixel/conversion?id=1&value=10.00".to_string(),
        ]
    );
    assert!(engine.scheduler().queue().is_empty());

    engine.shut_down().await;
    let persisted: Vec<DelayedEvent> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(persisted.is_empty());
}

/// An unreadable snapshot is left alone and the engine starts with an empty queue.
#[tokio::test(start_paused = true)]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(&path, b"[{\"id\": ").unwrap();

    let transport = Arc::new(FakeTransport::no_fill());
    let source = Arc::new(MemoryScenarioSource::with(always_click_scenario("corrupt")));
    let engine = start(&transport, &source, &path).await;

    assert!(engine.scheduler().queue().is_empty());
    assert!(path.exists());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(transport.request_count() > 0);

    engine.shut_down().await;
}
