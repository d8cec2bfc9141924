//! Sense HAT to MQTT bridge
//!
//! Samples the Raspberry Pi Sense HAT environmental sensors on a fixed cadence
//! and publishes the readings as JSON to an MQTT broker, announcing the
//! sensors through Home Assistant MQTT discovery.
//!
//! # Overview
//!
//! - [`config`] resolves and validates the immutable [`BridgeConfig`]
//! - [`session`] owns the broker connection, reconnect backoff and availability
//! - [`discovery`] builds the retained discovery documents
//! - [`sampler`] reads the sensor and publishes state payloads
//! - [`sensor`] defines the read contract and the Sense HAT backend
//! - [`transport`] holds the connector/link seam and the rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust
//! use sensehat_mqtt::sampler::format_state_payload;
//! use sensehat_mqtt::sensor::Reading;
//!
//! let reading = Reading::new(23.456, 23.1, 41.2, 1013.249);
//! let payload = format_state_payload(&reading).unwrap();
//! let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
//! assert_eq!(json["temperature_from_humidity"], 23.46);
//! assert_eq!(json["pressure"], 1013.25);
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod observability;
pub mod sampler;
pub mod sensor;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult};
pub use sampler::SampleLoop;
pub use sensor::{Reading, SensorSource};
pub use session::{ConnectionState, SessionHandle, SessionManager};
pub use transport::mqtt::MqttConnector;
