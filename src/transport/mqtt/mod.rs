//! MQTT implementation of the transport session
//!
//! Split the way the rest of the transport is: pure functions apart from I/O.
//!
//! - [`connection`] - option building and the reconnect backoff policy
//! - [`message_handler`] - mapping rumqttc events to session events
//! - [`session`] - the rumqttc client and event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use trv_bridge::config::BridgeConfig;
//! use trv_bridge::transport::{MqttSession, OutboundMessage, Session};
//!
//! # tokio_test::block_on(async {
//! let config = BridgeConfig::load_from_file("trv-bridge.toml".as_ref())?;
//! let mut session = MqttSession::new(config.mqtt.clone());
//!
//! session.connect().await?;
//! session.subscribe(&["home/nest/temperature".to_string()]).await?;
//! session.try_publish(&OutboundMessage {
//!     topic: "constants/auto".to_string(),
//!     payload: "Auto".to_string(),
//!     retain: true,
//! })?;
//! while session.has_pending() {
//!     session.poll().await?;
//! }
//! session.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod message_handler;
pub mod session;

pub use connection::{configure_mqtt_options, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::MqttSession;
