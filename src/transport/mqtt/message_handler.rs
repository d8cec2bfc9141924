//! Pure routing of MQTT event-loop output
//!
//! Maps rumqttc events and connection errors onto the handful of outcomes the
//! session cares about: handshake done, broker closed the session, or
//! nothing interesting.

use crate::error::sanitize_error_message;
use crate::transport::SessionError;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{ConnectionError, Event};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify an event-loop error into a retriable session error
    pub fn classify_connection_error(error: &ConnectionError) -> SessionError {
        let message = sanitize_error_message(&error.to_string());
        match error {
            ConnectionError::ConnectionRefused(code) if Self::is_auth_rejection(code) => {
                SessionError::AuthenticationRejected(message)
            }
            _ => SessionError::BrokerUnreachable(message),
        }
    }

    /// Return codes meaning "fix the credentials", as opposed to "try later"
    pub fn is_auth_rejection(code: &ConnectReturnCode) -> bool {
        matches!(
            code,
            ConnectReturnCode::BadUserNamePassword
                | ConnectReturnCode::NotAuthorized
                | ConnectReturnCode::BadAuthenticationMethod
        )
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish
    ConnectionAcknowledged,
    /// MQTT broker disconnected
    Disconnected,
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
