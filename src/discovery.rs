//! Home Assistant MQTT discovery
//!
//! One retained config document per measurement, published under
//! `{discovery_prefix}/sensor/{unique_id}/config` each time the broker session
//! comes up. The documents are static, so republishing is idempotent.

use crate::config::TopicSection;
use crate::sensor::Measurement;
use crate::session::SessionHandle;
use crate::transport::mqtt::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Device block shared by every entity
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            identifiers: vec!["sensehat".to_string()],
            name: "Sense HAT".to_string(),
            manufacturer: "Raspberry Pi".to_string(),
            model: "Sense HAT".to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Discovery config document for one sensor entity
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscoveryDescriptor {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub value_template: String,
    pub unit_of_measurement: String,
    pub device_class: String,
    pub state_class: String,
    pub availability_topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
    pub device: DeviceInfo,
}

impl DiscoveryDescriptor {
    pub fn for_measurement(measurement: Measurement, topics: &TopicSection) -> Self {
        Self {
            name: entity_name(measurement).to_string(),
            unique_id: unique_id(measurement).to_string(),
            state_topic: topics.state_topic(),
            value_template: format!("{{{{ value_json.{} }}}}", measurement.key()),
            unit_of_measurement: measurement.unit().to_string(),
            device_class: device_class(measurement).to_string(),
            state_class: "measurement".to_string(),
            availability_topic: topics.availability_topic(),
            payload_available: PAYLOAD_ONLINE.to_string(),
            payload_not_available: PAYLOAD_OFFLINE.to_string(),
            device: DeviceInfo::default(),
        }
    }
}

fn unique_id(measurement: Measurement) -> &'static str {
    match measurement {
        Measurement::TemperatureFromHumidity => "sensehat_temp_humidity",
        Measurement::TemperatureFromPressure => "sensehat_temp_pressure",
        Measurement::Humidity => "sensehat_humidity",
        Measurement::Pressure => "sensehat_pressure",
    }
}

fn entity_name(measurement: Measurement) -> &'static str {
    match measurement {
        Measurement::TemperatureFromHumidity => "Temperature (from humidity)",
        Measurement::TemperatureFromPressure => "Temperature (from pressure)",
        Measurement::Humidity => "Humidity",
        Measurement::Pressure => "Pressure",
    }
}

fn device_class(measurement: Measurement) -> &'static str {
    match measurement {
        Measurement::TemperatureFromHumidity | Measurement::TemperatureFromPressure => {
            "temperature"
        }
        Measurement::Humidity => "humidity",
        Measurement::Pressure => "pressure",
    }
}

/// Builds and publishes the four discovery documents
#[derive(Debug, Clone)]
pub struct DiscoveryPublisher {
    topics: TopicSection,
}

impl DiscoveryPublisher {
    pub fn new(topics: &TopicSection) -> Self {
        Self {
            topics: topics.clone(),
        }
    }

    pub fn descriptors(&self) -> Vec<DiscoveryDescriptor> {
        Measurement::ALL
            .iter()
            .map(|m| DiscoveryDescriptor::for_measurement(*m, &self.topics))
            .collect()
    }

    /// `(topic, payload)` pairs in publish order
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.descriptors()
            .into_iter()
            .filter_map(|descriptor| {
                let topic = self.topics.discovery_topic(&descriptor.unique_id);
                match serde_json::to_vec(&descriptor) {
                    Ok(payload) => Some((topic, payload)),
                    Err(e) => {
                        warn!(
                            unique_id = %descriptor.unique_id,
                            error = %e,
                            "Failed to serialize discovery config"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Publish every descriptor retained. Returns how many went out.
    pub async fn publish_all(&self, session: &SessionHandle) -> usize {
        let mut sent = 0;
        for (topic, payload) in self.messages() {
            match session.publish(&topic, payload, true).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(topic = %topic, error = %e, "Failed to publish discovery config"),
            }
        }
        info!(
            sent,
            discovery_prefix = %self.topics.discovery_prefix,
            "Discovery sent"
        );
        sent
    }
}

static VALUE_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*value_json\.([A-Za-z0-9_]+)\s*\}\}$").expect("valid regex"));

/// Evaluate a `{{ value_json.<key> }}` template against a JSON state payload,
/// the way Home Assistant resolves the entity state
pub fn extract_value(template: &str, state_payload: &[u8]) -> Option<Value> {
    let key = VALUE_TEMPLATE.captures(template.trim())?.get(1)?.as_str();
    let state: Value = serde_json::from_slice(state_payload).ok()?;
    state.get(key).cloned()
}
