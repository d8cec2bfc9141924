//! Shared helpers for integration tests

use sensehat_mqtt::observability::BridgeMetrics;
use sensehat_mqtt::config::BridgeConfig;
use sensehat_mqtt::session::{ReconnectConfig, SessionManager};
use sensehat_mqtt::testing::{test_config, MockConnector};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `limit` elapses.
/// Works on paused tokio time, where sleeping advances the clock.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Session manager over a mock connector with default settings
#[allow(dead_code)]
pub fn mock_session(
    connector: MockConnector,
) -> (SessionManager<MockConnector>, Arc<BridgeMetrics>) {
    mock_session_with_config(connector, test_config())
}

/// Session manager over a mock connector; timeouts follow `config`
#[allow(dead_code)]
pub fn mock_session_with_config(
    connector: MockConnector,
    config: BridgeConfig,
) -> (SessionManager<MockConnector>, Arc<BridgeMetrics>) {
    let metrics = Arc::new(BridgeMetrics::new());
    let manager = SessionManager::new(connector, Arc::new(config), Arc::clone(&metrics))
        .with_reconnect_config(ReconnectConfig::default());
    (manager, metrics)
}
