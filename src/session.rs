//! Broker session lifecycle
//!
//! [`SessionManager`] is the only writer of [`ConnectionState`]. It runs as a
//! single supervisor task, so at most one connect attempt is ever in flight:
//!
//! ```text
//! Disconnected -> Connecting -> Connected --(link closed)--> Disconnected
//!      ^              |                                          |
//!      +--(backoff)---+ (BrokerUnreachable / AuthRejected)       |
//!      +------------------------(backoff)------------------------+
//! ```
//!
//! Every transition to `Connected` publishes the availability birth message
//! and re-announces discovery. Other tasks publish through a cloned
//! [`SessionHandle`], which fails fast with `NotConnected` instead of waiting.

use crate::config::BridgeConfig;
use crate::discovery::DiscoveryPublisher;
use crate::error::sanitize_error_message;
use crate::observability::metrics::BridgeMetrics;
use crate::transport::mqtt::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::transport::{BrokerConnector, BrokerLink, SessionError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Connection state, owned by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Exponential reconnection backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling the doubling never exceeds
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based): initial * multiplier^(attempt-1), capped
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u128::from(self.multiplier).saturating_pow(exponent);
        let millis = self
            .initial_delay
            .as_millis()
            .saturating_mul(factor)
            .min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Upper bound on the broker handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single publish when the sample interval is longer
pub const MAX_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bounds for network operations
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTimeouts {
    /// TCP connect plus CONNECT/CONNACK exchange
    pub handshake: Duration,
    /// Single publish call
    pub publish: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: HANDSHAKE_TIMEOUT,
            publish: MAX_PUBLISH_TIMEOUT,
        }
    }
}

impl SessionTimeouts {
    /// Publish bounded by the sample interval so a stuck publish never spans a tick
    pub fn for_interval(interval: Duration) -> Self {
        Self {
            publish: interval.min(MAX_PUBLISH_TIMEOUT),
            ..Self::default()
        }
    }
}

/// Cloneable publishing handle shared with the sample loop
#[derive(Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<ConnectionState>,
    link: Arc<Mutex<Option<Arc<dyn BrokerLink>>>>,
    publish_timeout: Duration,
}

impl SessionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver for observing state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Publish on the live connection, or fail with `NotConnected` without
    /// queueing. A failed or timed-out publish closes the link so the
    /// session manager reconnects.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        // Held for the whole publish so teardown cannot interleave
        let guard = self.link.lock().await;
        let Some(link) = guard.as_ref() else {
            return Err(SessionError::NotConnected);
        };

        match tokio::time::timeout(self.publish_timeout, link.publish(topic, payload, retain)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SessionError::NotConnected)) => Err(SessionError::NotConnected),
            Ok(Err(e)) => {
                link.close(format!("publish to {topic} failed: {e}"));
                Err(e)
            }
            Err(_) => {
                link.close(format!("publish to {topic} timed out"));
                Err(SessionError::PublishTimeout(self.publish_timeout))
            }
        }
    }
}

/// Owns the broker connection and its reconnect loop
pub struct SessionManager<C: BrokerConnector> {
    connector: C,
    config: Arc<BridgeConfig>,
    discovery: DiscoveryPublisher,
    reconnect: ReconnectConfig,
    timeouts: SessionTimeouts,
    state_tx: watch::Sender<ConnectionState>,
    handle: SessionHandle,
    metrics: Arc<BridgeMetrics>,
}

impl<C: BrokerConnector> SessionManager<C> {
    pub fn new(connector: C, config: Arc<BridgeConfig>, metrics: Arc<BridgeMetrics>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let timeouts = SessionTimeouts::for_interval(config.update_interval());
        let handle = SessionHandle {
            state_rx,
            link: Arc::new(Mutex::new(None)),
            publish_timeout: timeouts.publish,
        };

        Self {
            discovery: DiscoveryPublisher::new(&config.topics),
            connector,
            config,
            reconnect: ReconnectConfig::default(),
            timeouts,
            state_tx,
            handle,
            metrics,
        }
    }

    pub fn with_reconnect_config(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.handle.publish_timeout = timeouts.publish;
        self.timeouts = timeouts;
        self
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Single connect attempt. On success the link is installed, state
    /// becomes `Connected` and discovery is announced.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerLink>, SessionError> {
        self.transition(ConnectionState::Connecting);
        self.metrics.record_connection_attempt();

        let attempt = tokio::time::timeout(self.timeouts.handshake, self.connector.connect())
            .await
            .unwrap_or_else(|_| {
                Err(SessionError::BrokerUnreachable(format!(
                    "handshake timed out after {:?}",
                    self.timeouts.handshake
                )))
            });

        match attempt {
            Ok(link) => {
                *self.handle.link.lock().await = Some(Arc::clone(&link));
                self.transition(ConnectionState::Connected);
                self.metrics.record_connection_established();
                self.announce().await;
                Ok(link)
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Availability birth message followed by discovery
    async fn announce(&self) {
        let availability = self.config.topics.availability_topic();
        if let Err(e) = self
            .handle
            .publish(&availability, PAYLOAD_ONLINE.as_bytes().to_vec(), true)
            .await
        {
            warn!(error = %e, topic = %availability, "Failed to publish availability");
        }

        let sent = self.discovery.publish_all(&self.handle).await;
        self.metrics.record_discovery_published(sent as u64);
    }

    /// Supervisor loop: connect, watch the link, back off, repeat until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let broker = self.connector.describe();
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let attempt = tokio::select! {
                result = self.connect() => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match attempt {
                Ok(link) => {
                    failures = 0;
                    tokio::select! {
                        reason = link.closed() => {
                            self.teardown().await;
                            warn!(
                                broker = %broker,
                                reason = %sanitize_error_message(&reason),
                                "Broker connection lost"
                            );
                        }
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                Err(e) => {
                    let kind = if matches!(e, SessionError::AuthenticationRejected(_)) {
                        "authentication_rejected"
                    } else {
                        "broker_unreachable"
                    };
                    warn!(broker = %broker, kind, error = %e, "Broker connection attempt failed");
                }
            }

            failures = failures.saturating_add(1);
            let delay = self.reconnect.calculate_backoff_delay(failures);
            info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnecting"
            );
            if !interruptible_sleep(&mut shutdown, delay).await {
                break;
            }
        }

        self.close_gracefully().await;
        info!("Session manager stopped");
    }

    /// Drop the link after it closed on its own
    async fn teardown(&self) {
        self.transition(ConnectionState::Disconnected);
        self.handle.link.lock().await.take();
    }

    /// Publish offline availability and disconnect, best effort
    async fn close_gracefully(&self) {
        self.transition(ConnectionState::Disconnected);
        let link = self.handle.link.lock().await.take();
        let Some(link) = link else {
            return;
        };

        let availability = self.config.topics.availability_topic();
        let offline = link.publish(&availability, PAYLOAD_OFFLINE.as_bytes().to_vec(), true);
        match tokio::time::timeout(self.timeouts.publish, offline).await {
            Ok(Ok(())) => debug!("Published offline availability"),
            Ok(Err(e)) => debug!(error = %e, "Could not publish offline availability"),
            Err(_) => debug!("Timed out publishing offline availability"),
        }

        link.disconnect().await;
        info!("Disconnected from MQTT broker");
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            self.log_state_transition(from, to);
        }
    }

    fn log_state_transition(&self, from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (_, ConnectionState::Connecting) => info!(
                host = %self.config.mqtt.host,
                port = self.config.mqtt.port,
                "Connecting to MQTT broker"
            ),
            (_, ConnectionState::Connected) => info!(
                host = %self.config.mqtt.host,
                port = self.config.mqtt.port,
                "Connected to MQTT broker"
            ),
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("Disconnected from MQTT broker")
            }
            (from, to) => debug!(?from, ?to, "Connection state changed"),
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep unless shutdown arrives first. Returns false on shutdown.
pub async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(shutdown) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
