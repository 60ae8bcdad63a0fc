//! Payload encodings used on the bus
//!
//! Payloads are plain UTF-8 strings: decimal temperatures, `ON`/`OFF` switch
//! commands, `Heat`/`Off` device states and `on`/`off` boiler demand.

/// Per-device heating state published on `home/{name}/trv/state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Heat,
    Off,
}

impl DeviceState {
    pub fn from_calling_for_heat(calling: bool) -> Self {
        if calling {
            DeviceState::Heat
        } else {
            DeviceState::Off
        }
    }

    pub fn as_payload(&self) -> &'static str {
        match self {
            DeviceState::Heat => "Heat",
            DeviceState::Off => "Off",
        }
    }
}

/// Switch command carried by `ON`/`OFF` payloads.
///
/// Anything other than the exact `ON` payload switches off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    pub fn parse(payload: &str) -> Self {
        if payload.trim() == "ON" {
            SwitchCommand::On
        } else {
            SwitchCommand::Off
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, SwitchCommand::On)
    }
}

/// Parse a decimal temperature payload such as `"19.5"`.
///
/// Non-finite values are rejected along with anything that fails to parse.
pub fn parse_temperature(payload: &str) -> Option<f64> {
    payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Render a temperature for publishing: `19` for whole degrees, `19.5` otherwise.
pub fn format_temperature(value: f64) -> String {
    format!("{value}")
}
