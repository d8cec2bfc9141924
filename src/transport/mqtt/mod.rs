//! rumqttc-backed broker transport
//!
//! Split the same way as the rest of the transport code: pure pieces first,
//! I/O last.
//!
//! - [`connection`] - Pure MQTT option construction (credentials, last-will)
//! - [`message_handler`] - Pure event routing and error classification
//! - [`client`] - Impure connector and link around `rumqttc::v5::AsyncClient`
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensehat_mqtt::config::BridgeConfig;
//! use sensehat_mqtt::transport::mqtt::MqttConnector;
//! use sensehat_mqtt::transport::BrokerConnector;
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let config = Arc::new(BridgeConfig::from_env()?);
//! let connector = MqttConnector::new(config);
//! let link = connector.connect().await?;
//! link.publish("home/sensehat/status", b"{}".to_vec(), false).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(_f: F) {}
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::{MqttConnector, MqttLink};
pub use connection::{configure_mqtt_options, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
pub use message_handler::{EventRoute, MessageHandler};
