//! Transport layer between the session manager and the broker
//!
//! The session manager never talks to a network client directly. It asks a
//! [`BrokerConnector`] for a fresh [`BrokerLink`] on every (re)connect, which
//! keeps the reconnect state machine testable with an in-memory connector.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub mod mqtt;

/// Broker session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Broker unreachable: {0}")]
    BrokerUnreachable(String),

    #[error("Authentication rejected by broker: {0}")]
    AuthenticationRejected(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
}

impl SessionError {
    /// Connection-level failures that drive the reconnect backoff
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SessionError::BrokerUnreachable(_) | SessionError::AuthenticationRejected(_)
        )
    }
}

/// Opens broker connections
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a network connection and complete the broker handshake.
    /// Returns only once the broker has acknowledged the session.
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, SessionError>;

    /// `host:port` style description for log lines
    fn describe(&self) -> String;
}

/// One established broker session
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Publish a message with QoS 1
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), SessionError>;

    /// Resolves with a reason once the link is no longer usable
    async fn closed(&self) -> String;

    /// Mark the link unusable; `closed()` resolves with `reason`
    fn close(&self, reason: String);

    /// Best-effort clean MQTT disconnect
    async fn disconnect(&self);
}

/// Latching "link closed" flag carrying the first close reason
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<Option<String>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Record the close reason. Returns false when already closed.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub async fn wait(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "close signal dropped".to_string();
            }
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}
