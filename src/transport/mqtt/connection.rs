//! Pure MQTT connection configuration
//!
//! Builds rumqttc options from the bridge configuration: client id,
//! credentials, keep-alive and the availability last-will.

use crate::config::BridgeConfig;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use std::time::Duration;

/// Availability payloads understood by Home Assistant defaults
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Request channel capacity between the async client and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &BridgeConfig) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        config.mqtt.client_id.clone(),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );

    if let Some(username) = &config.mqtt.username {
        let password = config.mqtt.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.clone(), password);
    }

    mqtt_options.set_keep_alive(KEEP_ALIVE);

    // Broker flips availability to offline if we vanish without DISCONNECT
    let lwt = LastWill::new(
        config.topics.availability_topic(),
        PAYLOAD_OFFLINE,
        QoS::AtLeastOnce,
        true,
        None,
    );
    mqtt_options.set_last_will(lwt);

    mqtt_options
}
