//! rumqttc-backed [`Session`]
//!
//! Every connect builds a fresh client and event loop and waits for the
//! broker's ConnAck. rumqttc's own auto-reconnect is never used: when the
//! event loop errors the session is dropped and [`TransportLoop`] decides
//! when to try again.
//!
//! [`TransportLoop`]: crate::transport::TransportLoop

use super::connection::configure_mqtt_options;
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{OutboundMessage, Session, SessionEvent, TransportError};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Filter, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ClientError, Event, EventLoop};
use rumqttc::Outgoing;
use std::time::Duration;
use tracing::{debug, info, warn};

const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MqttSession {
    config: MqttSection,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    /// Publishes handed to the client but not yet written out
    pending_outgoing: usize,
}

impl MqttSession {
    pub fn new(config: MqttSection) -> Self {
        Self {
            config,
            client: None,
            event_loop: None,
            pending_outgoing: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn create_connection(&self) -> Result<(AsyncClient, EventLoop), TransportError> {
        let mqtt_options = configure_mqtt_options(&self.config)?;
        Ok(AsyncClient::new(mqtt_options, self.config.request_capacity))
    }

    /// Poll the fresh event loop until the broker answers the CONNECT
    async fn wait_for_connection_confirmation(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return match ack.code {
                            ConnectReturnCode::Success => Ok(()),
                            code => Err(TransportError::ConnectionFailed(format!(
                                "broker refused connection: {code:?}"
                            ))),
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnAckTimeout),
        }
    }

    fn drop_connection(&mut self) {
        self.client = None;
        self.event_loop = None;
        self.pending_outgoing = 0;
    }
}

#[async_trait::async_trait]
impl Session for MqttSession {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.drop_connection();

        let (client, mut event_loop) = self.create_connection()?;
        Self::wait_for_connection_confirmation(&mut event_loop, self.config.connect_timeout())
            .await?;

        info!(broker = %self.config.broker_url, "Connected to MQTT broker");
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        if topics.is_empty() {
            return Ok(());
        }

        let filters = topics
            .iter()
            .map(|topic| Filter::new(topic.clone(), QoS::AtLeastOnce));
        client
            .try_subscribe_many(filters)
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;

        for topic in topics {
            debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
        }
        Ok(())
    }

    fn try_publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        let qos = MessageHandler::determine_qos_level(message.retain);

        match client.try_publish(
            message.topic.clone(),
            qos,
            message.retain,
            message.payload.clone().into_bytes(),
        ) {
            Ok(()) => {
                self.pending_outgoing += 1;
                Ok(())
            }
            Err(ClientError::TryRequest(_)) => Err(TransportError::QueueFull),
            Err(e) => Err(TransportError::PublishFailed(e.to_string())),
        }
    }

    async fn poll(&mut self) -> Result<SessionEvent, TransportError> {
        let event_loop = self.event_loop.as_mut().ok_or(TransportError::NotConnected)?;

        match event_loop.poll().await {
            Ok(event) => {
                let route = MessageHandler::route_mqtt_event(&event);
                if route == EventRoute::PublishWritten {
                    self.pending_outgoing = self.pending_outgoing.saturating_sub(1);
                }
                if route == EventRoute::Disconnected {
                    self.drop_connection();
                }
                Ok(route.into())
            }
            Err(e) => {
                self.drop_connection();
                Err(TransportError::ConnectionLost(e.to_string()))
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.pending_outgoing > 0
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let (Some(client), Some(mut event_loop)) = (self.client.take(), self.event_loop.take())
        else {
            return Ok(());
        };
        self.pending_outgoing = 0;

        client
            .try_disconnect()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // The DISCONNECT packet only leaves once the event loop runs
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out flushing MQTT disconnect");
        }
        info!("MQTT client disconnected");
        Ok(())
    }
}
