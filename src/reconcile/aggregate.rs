//! Boiler demand aggregation

/// Whole-house heating demand published on `home/nest/call_for_heat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoilerDemand {
    On,
    Off,
}

impl BoilerDemand {
    pub fn as_payload(&self) -> &'static str {
        match self {
            BoilerDemand::On => "on",
            BoilerDemand::Off => "off",
        }
    }
}

/// `On` if any device calls for heat
pub fn aggregate<I>(demands: I) -> BoilerDemand
where
    I: IntoIterator<Item = bool>,
{
    if demands.into_iter().any(|calling| calling) {
        BoilerDemand::On
    } else {
        BoilerDemand::Off
    }
}
