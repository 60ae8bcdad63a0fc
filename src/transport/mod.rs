//! Transport layer: the pub/sub session and the loop that keeps it alive
//!
//! [`Session`] abstracts the MQTT connection so the reconnect loop can be
//! driven by a scripted session in tests. [`TransportLoop`] owns the session
//! and an [`Outbox`]; handlers only ever queue messages into the outbox and
//! the loop flushes it.

use bytes::Bytes;
use std::collections::VecDeque;
use thiserror::Error;

pub mod event_loop;
pub mod mqtt;

pub use event_loop::{interruptible_sleep, LoopHandler, LoopOptions, TransportLoop};
pub use mqtt::{MqttSession, ReconnectConfig};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("ConnAck timeout - no connection confirmation received")]
    ConnAckTimeout,
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Client request queue is full")]
    QueueFull,
    #[error("Publishing failed: {0}")]
    PublishFailed(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Handler failed")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Message received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Payload as text; invalid UTF-8 is replaced rather than rejected
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Message queued for publishing
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// What a single session poll produced
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broker acknowledged a connection
    Connected,
    /// Publish on a subscribed topic
    Message(InboundMessage),
    /// Broker closed the session
    Disconnected,
    /// Anything else (acks, pings, outgoing packets)
    Other,
}

/// A pub/sub session the transport loop can drive
#[async_trait::async_trait]
pub trait Session: Send {
    /// Open a new connection, returning once the broker has acknowledged it
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to every topic filter in one request
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Hand a message to the client without waiting.
    /// Returns [`TransportError::QueueFull`] when it must be retried later.
    fn try_publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Wait for the next session event. An error means the session is gone.
    async fn poll(&mut self) -> Result<SessionEvent, TransportError>;

    /// Publishes accepted by the client but not yet written to the network
    fn has_pending(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Outbound queue shared between the loop and its handler
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<OutboundMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, topic: impl Into<String>, payload: impl Into<String>, retain: bool) {
        self.queue.push_back(OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.queue.iter()
    }

    /// Remove and return everything queued
    pub fn take_all(&mut self) -> Vec<OutboundMessage> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn front(&self) -> Option<&OutboundMessage> {
        self.queue.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<OutboundMessage> {
        self.queue.pop_front()
    }
}
