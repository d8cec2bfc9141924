//! Periodic sample-and-publish loop
//!
//! Each tick reads the sensor, formats the state payload and hands it to the
//! session. Nothing that goes wrong inside a tick stops the loop: a failed
//! read or a missing connection only skips that tick.

use crate::config::BridgeConfig;
use crate::observability::metrics::BridgeMetrics;
use crate::sensor::{Reading, SensorError, SensorSource};
use crate::session::{wait_for_shutdown, SessionHandle};
use crate::tick_span;
use crate::transport::SessionError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

/// Upper bound on a single sensor read
pub const MAX_SENSOR_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    SensorFailed,
    NotConnected,
    PublishFailed,
}

/// JSON state document, values rounded to two decimals
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatePayload {
    pub temperature_from_humidity: f64,
    pub temperature_from_pressure: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl From<&Reading> for StatePayload {
    fn from(reading: &Reading) -> Self {
        Self {
            temperature_from_humidity: round2(reading.temperature_from_humidity),
            temperature_from_pressure: round2(reading.temperature_from_pressure),
            humidity: round2(reading.humidity),
            pressure: round2(reading.pressure),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serialize a reading into the state payload bytes
pub fn format_state_payload(reading: &Reading) -> Result<Vec<u8>, SessionError> {
    serde_json::to_vec(&StatePayload::from(reading)).map_err(SessionError::Serialization)
}

pub struct SampleLoop {
    sensor: Arc<dyn SensorSource>,
    session: SessionHandle,
    state_topic: String,
    interval: Duration,
    read_timeout: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl SampleLoop {
    pub fn new(
        sensor: Arc<dyn SensorSource>,
        session: SessionHandle,
        config: &BridgeConfig,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let interval = config.update_interval();
        Self {
            sensor,
            session,
            state_topic: config.topics.state_topic(),
            interval,
            read_timeout: interval.min(MAX_SENSOR_READ_TIMEOUT),
            metrics,
        }
    }

    async fn read_sensor(&self) -> Result<Reading, SensorError> {
        match tokio::time::timeout(self.read_timeout, self.sensor.read()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout(self.read_timeout)),
        }
    }

    /// Run one read-format-publish cycle
    pub async fn tick(&self) -> TickOutcome {
        self.metrics.record_tick();

        let reading = match self.read_sensor().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(sensor = self.sensor.name(), error = %e, "Sensor error, skipping tick");
                self.metrics.record_sensor_failure();
                return TickOutcome::SensorFailed;
            }
        };

        let payload = match format_state_payload(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize state payload");
                self.metrics.record_publish_failure();
                return TickOutcome::PublishFailed;
            }
        };

        match self.session.publish(&self.state_topic, payload, false).await {
            Ok(()) => {
                debug!(
                    topic = %self.state_topic,
                    taken_at = %reading.taken_at,
                    "Published reading"
                );
                self.metrics.record_reading_published();
                TickOutcome::Published
            }
            Err(SessionError::NotConnected) => {
                info!(topic = %self.state_topic, "Publish skipped, broker not connected");
                self.metrics.record_publish_skipped();
                TickOutcome::NotConnected
            }
            Err(e) => {
                warn!(topic = %self.state_topic, error = %e, "Failed to publish reading");
                self.metrics.record_publish_failure();
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tick on the configured cadence until shutdown. Shutdown is observed
    /// between ticks, so an in-flight publish completes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            topic = %self.state_topic,
            "Sample loop started"
        );

        let mut tick_number: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            tick_number += 1;

            // Bounded by the read and publish timeouts; shutdown waits for it
            let outcome = self
                .tick()
                .instrument(tick_span!(number = tick_number))
                .await;
            debug!(?outcome, "Tick finished");
        }

        info!("Sample loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_payload_has_exactly_four_keys() {
        let reading = Reading::new(23.456, 23.1, 41.234, 1013.249);
        let json: serde_json::Value =
            serde_json::from_slice(&format_state_payload(&reading).unwrap()).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(json["temperature_from_humidity"], 23.46);
        assert_eq!(json["humidity"], 41.23);
        assert_eq!(json["pressure"], 1013.25);
    }

    #[test]
    fn test_payload_keeps_implausible_values() {
        let reading = Reading::new(-40.0, 120.0, 0.0, 0.0);
        let payload = StatePayload::from(&reading);
        assert_eq!(payload.temperature_from_humidity, -40.0);
        assert_eq!(payload.temperature_from_pressure, 120.0);
    }

    proptest! {
        #[test]
        fn prop_rounding_is_within_half_a_hundredth(value in -1000.0f64..2000.0) {
            let rounded = round2(value);
            prop_assert!((rounded - value).abs() <= 0.005 + 1e-9);
            prop_assert!((rounded * 100.0 - (rounded * 100.0).round()).abs() < 1e-6);
        }
    }
}
