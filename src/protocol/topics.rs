//! Bus topic construction and device name validation
//!
//! All topics live under the `home/` prefix. The second segment is the
//! discriminator the router dispatches on: a fixed keyword (`energenie`,
//! `nest`, `biglight`) or the name of a configured valve.

use thiserror::Error;

/// Root segment shared by every topic the bridge touches
pub const TOPIC_ROOT: &str = "home";

pub const DISCRIMINATOR_ENERGENIE: &str = "energenie";
pub const DISCRIMINATOR_NEST: &str = "nest";
pub const DISCRIMINATOR_BIGLIGHT: &str = "biglight";

/// Aggregate boiler demand (`on`/`off`), not retained
pub const TOPIC_CALL_FOR_HEAT: &str = "home/nest/call_for_heat";
/// External room sensor reading
pub const TOPIC_EXTERNAL_TEMPERATURE: &str = "home/nest/temperature";
/// Retained marker published on every (re)connect
pub const TOPIC_CONSTANTS_AUTO: &str = "constants/auto";

pub const TOPIC_ENERGENIE_WILDCARD: &str = "home/energenie/#";
pub const TOPIC_BIGLIGHT_WILDCARD: &str = "home/biglight/#";

/// Topic construction for per-valve topics
pub struct TopicBuilder;

impl TopicBuilder {
    /// Inbound target-set command: `home/{name}/trv/set`
    pub fn trv_set(name: &str) -> String {
        format!("{TOPIC_ROOT}/{name}/trv/set")
    }

    /// Last ambient reading: `home/{name}/trv/current`
    pub fn trv_current(name: &str) -> String {
        format!("{TOPIC_ROOT}/{name}/trv/current")
    }

    /// Local target: `home/{name}/trv/target`
    pub fn trv_target(name: &str) -> String {
        format!("{TOPIC_ROOT}/{name}/trv/target")
    }

    /// Per-device demand: `home/{name}/trv/state`
    pub fn trv_state(name: &str) -> String {
        format!("{TOPIC_ROOT}/{name}/trv/state")
    }
}

/// Split a topic into its segments, rejecting empty segments.
///
/// Returns `None` for topics outside `home/` or with an empty segment
/// (`home//x`, trailing slash).
pub fn split_topic(topic: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < 2 || segments[0] != TOPIC_ROOT {
        return None;
    }
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

/// Device names end up as a topic segment, so MQTT wildcards and separators
/// are not allowed.
pub fn validate_device_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyDeviceName);
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceNameChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device name cannot be empty")]
    EmptyDeviceName,
    #[error("Device name contains invalid character: '{0}'")]
    InvalidDeviceNameChar(char),
}
