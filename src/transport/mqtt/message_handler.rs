//! Pure routing of rumqttc events
//!
//! Turns MQTT v5 events into [`EventRoute`] decisions the supervisor acts on,
//! and implements MQTT topic filter matching for local dispatch.

use super::broker::InboundPublish;
use bytes::Bytes;
use rumqttc::Outgoing;
use rumqttc::v5::{ConnectionError, Event, StateError};
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => Self::route_publish(publish),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: Self::validate_subscription_success(&suback.return_codes).is_ok(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(packet_id)) => EventRoute::SubscribeSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Reason code of a refused SUBACK, which rumqttc reports as a poll error
    pub fn subscribe_refusal(error: &ConnectionError) -> Option<String> {
        match error {
            ConnectionError::MqttState(StateError::SubFail { reason }) => {
                Some(format!("{reason:?}"))
            }
            _ => None,
        }
    }

    fn route_publish(publish: &Publish) -> EventRoute {
        let (user_properties, subscription_ids) = match &publish.properties {
            Some(properties) => (
                properties.user_properties.clone(),
                properties.subscription_identifiers.clone(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        EventRoute::MessageReceived {
            publish: InboundPublish {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: Bytes::copy_from_slice(&publish.payload),
                user_properties,
            },
            subscription_ids,
        }
    }

    /// Validate subscription success from SubAck reason codes
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        if return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!(
                "Subscription failed with reason codes: {return_codes:?}"
            ))
        }
    }

    /// MQTT topic filter matching with `+` and `#` wildcards
    pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
        let mut filter_levels = filter.split('/');
        let mut topic_levels = topic.split('/');

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => continue,
                (Some(expected), Some(actual)) if expected == actual => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed filter
    MessageReceived {
        publish: InboundPublish,
        /// Subscription identifiers the broker matched, empty if unsupported
        subscription_ids: Vec<usize>,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// SUBSCRIBE written to the connection
    SubscribeSent { packet_id: u16 },
    /// Subscription acknowledged by the broker
    SubscriptionConfirmed { packet_id: u16, granted: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
