//! Bridge counters
//!
//! Plain atomics shared between the session manager and the sample loop.
//! Nothing exports them; the binary logs a snapshot on shutdown.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters for one bridge process
#[derive(Debug)]
pub struct BridgeMetrics {
    ticks: AtomicU64,
    readings_published: AtomicU64,
    sensor_failures: AtomicU64,
    publishes_skipped: AtomicU64,
    publish_failures: AtomicU64,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    discovery_messages: AtomicU64,
    // Unix millis, 0 = never
    last_published_ms: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            readings_published: AtomicU64::new(0),
            sensor_failures: AtomicU64::new(0),
            publishes_skipped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            discovery_messages: AtomicU64::new(0),
            last_published_ms: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reading_published(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_published_ms.store(now, Ordering::Relaxed);
    }

    pub fn record_sensor_failure(&self) {
        self.sensor_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Tick dropped because the session was not connected
    pub fn record_publish_skipped(&self) {
        self.publishes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery_published(&self, count: u64) {
        self.discovery_messages.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_ms = self.last_published_ms.load(Ordering::Relaxed);
        let last_published_at = i64::try_from(last_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            publishes_skipped: self.publishes_skipped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            discovery_messages: self.discovery_messages.load(Ordering::Relaxed),
            last_published_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

/// Point-in-time copy of [`BridgeMetrics`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub readings_published: u64,
    pub sensor_failures: u64,
    pub publishes_skipped: u64,
    pub publish_failures: u64,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub discovery_messages: u64,
    pub last_published_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}
