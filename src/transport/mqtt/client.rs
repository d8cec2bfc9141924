//! Impure I/O for the rumqttc-backed broker link
//!
//! [`MqttConnector::connect`] drives a fresh event loop until the broker's
//! CONNACK, then hands the event loop to a background task that keeps
//! polling it. Any event-loop error or broker DISCONNECT closes the link.

use super::connection::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BridgeConfig;
use crate::error::sanitize_error_message;
use crate::transport::{BrokerConnector, BrokerLink, CloseSignal, SessionError};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a graceful disconnect waits for the event loop to flush
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Connector producing rumqttc sessions for the configured broker
pub struct MqttConnector {
    config: Arc<BridgeConfig>,
}

impl MqttConnector {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    /// Poll the event loop until CONNACK or failure
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), SessionError> {
        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => return Ok(()),
                    EventRoute::Disconnected => {
                        return Err(SessionError::BrokerUnreachable(
                            "broker closed the connection during handshake".to_string(),
                        ));
                    }
                    _ => continue,
                },
                Err(e) => return Err(MessageHandler::classify_connection_error(&e)),
            }
        }
    }

    /// Keep the event loop running until it fails, then close the link
    async fn drive_event_loop(mut event_loop: EventLoop, closed: Arc<CloseSignal>) {
        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::Disconnected => {
                        closed.close("broker sent DISCONNECT");
                        break;
                    }
                    EventRoute::InfrastructureEvent(event) => {
                        tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                    }
                    _ => {}
                },
                Err(e) => {
                    closed.close(sanitize_error_message(&e.to_string()));
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, SessionError> {
        let options = configure_mqtt_options(&self.config);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Self::wait_for_connack(&mut event_loop).await?;

        let closed = Arc::new(CloseSignal::new());
        let handle = tokio::spawn(Self::drive_event_loop(event_loop, Arc::clone(&closed)));

        Ok(Arc::new(MqttLink {
            client,
            closed,
            event_loop_handle: Mutex::new(Some(handle)),
        }))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.config.mqtt.host, self.config.mqtt.port)
    }
}

/// Live rumqttc session
pub struct MqttLink {
    client: AsyncClient,
    closed: Arc<CloseSignal>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    fn take_event_loop_handle(&self) -> Option<JoinHandle<()>> {
        self.event_loop_handle
            .lock()
            .ok()
            .and_then(|mut handle| handle.take())
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), SessionError> {
        if self.closed.is_closed() {
            return Err(SessionError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| SessionError::PublishFailed(e.to_string()))
    }

    async fn closed(&self) -> String {
        self.closed.wait().await
    }

    fn close(&self, reason: String) {
        self.closed.close(reason);
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }

        if let Some(handle) = self.take_event_loop_handle() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(DISCONNECT_GRACE, handle).await {
                Ok(_) => info!("MQTT event loop shut down gracefully"),
                Err(_) => {
                    warn!("MQTT event loop didn't stop in time, aborting");
                    abort.abort();
                }
            }
        }
        self.closed.close("client disconnected");
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(handle) = self.take_event_loop_handle() {
            handle.abort();
        }
    }
}
