//! Pure mapping from rumqttc events to session events

use crate::transport::SessionEvent;
use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Classify a rumqttc event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                _ => EventRoute::InfrastructureEvent,
            },
            Event::Outgoing(Outgoing::Publish(_)) => EventRoute::PublishWritten,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Retained messages use QoS 1 so late subscribers get them reliably;
    /// everything else is fire-and-forget
    pub fn determine_qos_level(retain: bool) -> QoS {
        match retain {
            true => QoS::AtLeastOnce,
            false => QoS::AtMostOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived(InboundMessage),
    Disconnected,
    /// A queued publish has been written to the network
    PublishWritten,
    /// Acks, pings and similar
    InfrastructureEvent,
    OutgoingEvent,
}

impl From<EventRoute> for SessionEvent {
    fn from(route: EventRoute) -> Self {
        match route {
            EventRoute::ConnectionAcknowledged => SessionEvent::Connected,
            EventRoute::MessageReceived(message) => SessionEvent::Message(message),
            EventRoute::Disconnected => SessionEvent::Disconnected,
            EventRoute::PublishWritten
            | EventRoute::InfrastructureEvent
            | EventRoute::OutgoingEvent => SessionEvent::Other,
        }
    }
}
