//! Sample loop tests
//!
//! Tick-level behavior against a scripted sensor and a mock broker session:
//! one publish per good tick, skipped ticks on sensor or connection trouble,
//! and the loop cadence on paused time.

mod test_helpers;

use sensehat_mqtt::sampler::{SampleLoop, TickOutcome};
use sensehat_mqtt::session::SessionHandle;
use sensehat_mqtt::config::BridgeConfig;
use sensehat_mqtt::observability::BridgeMetrics;
use sensehat_mqtt::testing::{
    test_config, test_config_with, ConnectOutcome, MockConnector, MockSensor,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{eventually, mock_session_with_config};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const STATE_TOPIC: &str = "home/sensehat/status";

struct Harness {
    config: BridgeConfig,
    connector: MockConnector,
    handle: SessionHandle,
    metrics: Arc<BridgeMetrics>,
    shutdown_tx: watch::Sender<bool>,
    session_task: JoinHandle<()>,
}

impl Harness {
    async fn connected() -> Self {
        Self::start(MockConnector::new(), true).await
    }

    async fn start(connector: MockConnector, wait_for_connection: bool) -> Self {
        Self::start_with_config(connector, test_config(), wait_for_connection).await
    }

    async fn start_with_config(
        connector: MockConnector,
        config: BridgeConfig,
        wait_for_connection: bool,
    ) -> Self {
        let (manager, metrics) = mock_session_with_config(connector.clone(), config.clone());
        let handle = manager.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session_task = tokio::spawn(manager.run(shutdown_rx));
        if wait_for_connection {
            assert!(
                eventually(Duration::from_secs(5), || async { handle.is_connected() }).await,
                "mock broker never connected"
            );
        }
        Self {
            config,
            connector,
            handle,
            metrics,
            shutdown_tx,
            session_task,
        }
    }

    fn sample_loop(&self, sensor: MockSensor) -> SampleLoop {
        SampleLoop::new(
            Arc::new(sensor),
            self.handle.clone(),
            &self.config,
            Arc::clone(&self.metrics),
        )
    }

    async fn state_payloads(&self) -> Vec<Value> {
        self.connector
            .published_to(STATE_TOPIC)
            .await
            .into_iter()
            .map(|(_, payload, retain)| {
                assert!(!retain, "state payloads must not be retained");
                serde_json::from_slice(&payload).unwrap()
            })
            .collect()
    }

    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.session_task.await.unwrap();
    }
}

fn keys(payload: &Value) -> BTreeSet<String> {
    payload.as_object().unwrap().keys().cloned().collect()
}

#[tokio::test(start_paused = true)]
async fn test_n_ticks_publish_n_payloads_with_identical_keys() {
    // Arrange
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::always_ok());

    // Act
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(sample_loop.tick().await);
    }

    // Assert
    assert!(outcomes.iter().all(|o| *o == TickOutcome::Published));
    let payloads = harness.state_payloads().await;
    assert_eq!(payloads.len(), 5);
    let expected: BTreeSet<String> = [
        "temperature_from_humidity",
        "temperature_from_pressure",
        "humidity",
        "pressure",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect();
    assert!(payloads.iter().all(|p| keys(p) == expected));
    assert_eq!(payloads[0]["pressure"], 1013.2);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sensor_failure_skips_only_that_tick() {
    // Arrange: third read fails
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::failing_on([3]));

    // Act
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(sample_loop.tick().await);
    }

    // Assert
    assert_eq!(outcomes[2], TickOutcome::SensorFailed);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == TickOutcome::Published)
            .count(),
        4
    );
    assert_eq!(harness.state_payloads().await.len(), 4);
    assert_eq!(harness.metrics.snapshot().sensor_failures, 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_tick_is_skipped_without_buffering() {
    // Arrange: broker unreachable for the whole test
    let harness = Harness::start(
        MockConnector::with_script([ConnectOutcome::Unreachable; 20]),
        false,
    )
    .await;
    let sensor = MockSensor::always_ok();
    let sample_loop = harness.sample_loop(sensor.clone());

    // Act
    let first = sample_loop.tick().await;
    let second = sample_loop.tick().await;

    // Assert: sensor still read, nothing published or queued
    assert_eq!(first, TickOutcome::NotConnected);
    assert_eq!(second, TickOutcome::NotConnected);
    assert_eq!(sensor.read_count(), 2);
    assert!(harness.connector.published().await.is_empty());
    assert_eq!(harness.metrics.snapshot().publishes_skipped, 2);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_sensor_times_out() {
    // Arrange
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::hanging());

    // Act
    let started = tokio::time::Instant::now();
    let outcome = sample_loop.tick().await;

    // Assert: bounded by the 5s read timeout
    assert_eq!(outcome, TickOutcome::SensorFailed);
    assert_eq!(started.elapsed(), Duration::from_secs(5));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_publishes_on_cadence_and_stops_on_shutdown() {
    // Arrange
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::always_ok());
    let (loop_tx, loop_rx) = watch::channel(false);

    // Act: first tick is immediate, then every 60s
    let loop_task = tokio::spawn(sample_loop.run(loop_rx));
    tokio::time::sleep(Duration::from_secs(181)).await;
    loop_tx.send(true).unwrap();
    loop_task.await.unwrap();

    // Assert
    assert_eq!(harness.state_payloads().await.len(), 4);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_reconnect() {
    // Arrange
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::always_ok());
    assert_eq!(sample_loop.tick().await, TickOutcome::Published);

    // Act: broker drops the session, loop keeps ticking
    harness.connector.drop_connection("broker restarted").await;
    tokio::task::yield_now().await;
    let during_outage = sample_loop.tick().await;
    let reconnected = eventually(Duration::from_secs(10), || async {
        harness.handle.is_connected()
    })
    .await;
    let after = sample_loop.tick().await;

    // Assert
    assert_eq!(during_outage, TickOutcome::NotConnected);
    assert!(reconnected);
    assert_eq!(after, TickOutcome::Published);
    assert_eq!(harness.state_payloads().await.len(), 2);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_published_values_are_rounded_to_two_decimals() {
    // Arrange
    let harness = Harness::connected().await;
    let sensor = MockSensor::always_ok().with_reading(21.456_78, 20.004, 38.996, 1009.876_5);
    let sample_loop = harness.sample_loop(sensor);

    // Act
    assert_eq!(sample_loop.tick().await, TickOutcome::Published);

    // Assert
    let payloads = harness.state_payloads().await;
    assert_eq!(payloads[0]["temperature_from_humidity"], 21.46);
    assert_eq!(payloads[0]["temperature_from_pressure"], 20.0);
    assert_eq!(payloads[0]["humidity"], 39.0);
    assert_eq!(payloads[0]["pressure"], 1009.88);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_publish_finish() {
    // Arrange: every publish takes 2s to reach the broker
    let harness = Harness::connected().await;
    let sample_loop = harness.sample_loop(MockSensor::always_ok());
    harness.connector.set_publish_delay(Duration::from_secs(2));
    let (loop_tx, loop_rx) = watch::channel(false);

    // Act: stop requested halfway through the first publish
    let loop_task = tokio::spawn(sample_loop.run(loop_rx));
    tokio::time::sleep(Duration::from_secs(1)).await;
    loop_tx.send(true).unwrap();
    loop_task.await.unwrap();

    // Assert: the reading reached the broker, and no second tick ran
    assert_eq!(harness.state_payloads().await.len(), 1);
    assert_eq!(harness.metrics.snapshot().readings_published, 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_publish_bounded_by_short_interval() {
    // Arrange: 1s cadence against a broker that never acknowledges
    let harness = Harness::start_with_config(
        MockConnector::new(),
        test_config_with(&[("update_interval", "1")]),
        true,
    )
    .await;
    let sample_loop = harness.sample_loop(MockSensor::always_ok());
    harness.connector.set_publish_hang(true);

    // Act
    let started = tokio::time::Instant::now();
    let outcome = sample_loop.tick().await;

    // Assert: gave up after the interval, not the 5s publish ceiling
    assert_eq!(outcome, TickOutcome::PublishFailed);
    assert_eq!(started.elapsed(), Duration::from_secs(1));

    harness.connector.set_publish_hang(false);
    harness.stop().await;
}
