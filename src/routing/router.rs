//! Topic router
//!
//! Inbound topics are dispatched on their second segment. The table of
//! discriminators is built once at startup from the fixed keywords and the
//! configured valve names and refuses duplicates, so a device called
//! `nest` can never shadow the sensor topics.
//!
//! Routing has two failure modes with different severity:
//!
//! - a discriminator with no table entry means we received something we
//!   never subscribed to; that is a bug and is returned as [`RouteError`];
//! - a known discriminator with a malformed path or payload is a data
//!   error, logged and dropped (`Ok(None)`).

use crate::protocol::{
    parse_temperature, split_topic, validate_device_name, SwitchCommand, TopicBuilder,
    DISCRIMINATOR_BIGLIGHT, DISCRIMINATOR_ENERGENIE, DISCRIMINATOR_NEST,
    TOPIC_BIGLIGHT_WILDCARD, TOPIC_ENERGENIE_WILDCARD, TOPIC_EXTERNAL_TEMPERATURE,
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteError {
    #[error("Duplicate topic discriminator: {0}")]
    DuplicateDiscriminator(String),
    #[error("Invalid device name '{name}': {reason}")]
    InvalidDeviceName { name: String, reason: String },
    #[error("No handler for discriminator '{discriminator}' (topic '{topic}')")]
    UnknownDiscriminator {
        discriminator: String,
        topic: String,
    },
}

/// Handler family selected by a topic's second segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Energenie,
    Nest,
    BigLight,
    Trv(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigLightCommand {
    Switch(SwitchCommand),
    Brightness(u8),
}

/// A fully parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    /// `home/energenie/<house_code_hex>/<index>`
    Switch {
        house_code: u32,
        index: u8,
        command: SwitchCommand,
    },
    /// `home/nest/temperature`
    ExternalTemperature(f64),
    /// `home/biglight/<cloud_id>/{switch,brightness}`
    BigLight {
        cloud_id: u64,
        command: BigLightCommand,
    },
    /// `home/<device>/trv/set`
    TrvSet { device: String, target: f64 },
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    table: HashMap<String, Route>,
    devices: Vec<String>,
}

impl MessageRouter {
    /// Build the discriminator table. Fails on invalid or colliding names.
    pub fn new<'a, I>(device_names: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut router = Self {
            table: HashMap::new(),
            devices: Vec::new(),
        };

        router.register(DISCRIMINATOR_ENERGENIE, Route::Energenie)?;
        router.register(DISCRIMINATOR_NEST, Route::Nest)?;
        router.register(DISCRIMINATOR_BIGLIGHT, Route::BigLight)?;

        for name in device_names {
            validate_device_name(name).map_err(|e| RouteError::InvalidDeviceName {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            router.register(name, Route::Trv(name.to_string()))?;
            router.devices.push(name.to_string());
        }

        Ok(router)
    }

    fn register(&mut self, discriminator: &str, route: Route) -> Result<(), RouteError> {
        if self.table.contains_key(discriminator) {
            return Err(RouteError::DuplicateDiscriminator(discriminator.to_string()));
        }
        self.table.insert(discriminator.to_string(), route);
        Ok(())
    }

    /// Every topic filter the routes need
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![
            TOPIC_ENERGENIE_WILDCARD.to_string(),
            TOPIC_EXTERNAL_TEMPERATURE.to_string(),
            TOPIC_BIGLIGHT_WILDCARD.to_string(),
        ];
        topics.extend(self.devices.iter().map(|name| TopicBuilder::trv_set(name)));
        topics
    }

    /// Parse a message into a [`RoutedMessage`]
    pub fn route(&self, topic: &str, payload: &str) -> Result<Option<RoutedMessage>, RouteError> {
        let Some(segments) = split_topic(topic) else {
            warn!(topic, "Ignoring message with malformed topic");
            return Ok(None);
        };

        let routed = match self.route_for(segments[1], topic)? {
            Route::Energenie => Self::route_energenie(&segments, payload),
            Route::Nest => Self::route_nest(&segments, payload),
            Route::BigLight => Self::route_biglight(&segments, payload),
            Route::Trv(device) => Self::route_trv(device, &segments, payload),
        };

        if routed.is_none() {
            warn!(topic, payload, "Ignoring unparsable message");
        }
        Ok(routed)
    }

    fn route_for(&self, discriminator: &str, topic: &str) -> Result<&Route, RouteError> {
        self.table
            .get(discriminator)
            .ok_or_else(|| RouteError::UnknownDiscriminator {
                discriminator: discriminator.to_string(),
                topic: topic.to_string(),
            })
    }

    fn route_energenie(segments: &[&str], payload: &str) -> Option<RoutedMessage> {
        let [_, _, house_code, index] = segments else {
            return None;
        };
        let house_code = u32::from_str_radix(house_code, 16).ok()?;
        let index = index.parse::<u8>().ok()?;

        Some(RoutedMessage::Switch {
            house_code,
            index,
            command: SwitchCommand::parse(payload),
        })
    }

    fn route_nest(segments: &[&str], payload: &str) -> Option<RoutedMessage> {
        match segments {
            [_, _, "temperature"] => parse_temperature(payload).map(RoutedMessage::ExternalTemperature),
            _ => {
                debug!(?segments, "Unhandled nest topic");
                None
            }
        }
    }

    fn route_biglight(segments: &[&str], payload: &str) -> Option<RoutedMessage> {
        let [_, _, cloud_id, action] = segments else {
            return None;
        };
        let cloud_id = cloud_id.parse::<u64>().ok()?;

        let command = match *action {
            "switch" => BigLightCommand::Switch(SwitchCommand::parse(payload)),
            "brightness" => BigLightCommand::Brightness(payload.trim().parse::<u8>().ok()?),
            _ => return None,
        };

        Some(RoutedMessage::BigLight { cloud_id, command })
    }

    fn route_trv(device: &str, segments: &[&str], payload: &str) -> Option<RoutedMessage> {
        match segments {
            [_, _, "trv", "set"] => parse_temperature(payload).map(|target| RoutedMessage::TrvSet {
                device: device.to_string(),
                target,
            }),
            _ => None,
        }
    }
}
