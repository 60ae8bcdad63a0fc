//! Device record: everything the bridge knows about one radiator valve

use crate::config::TrvConfig;

/// State for one physical valve.
///
/// Identity fields are fixed at startup. The three temperature views
/// (ambient reading, local target, cloud value) are updated independently
/// by the radio link, bus commands and cloud polls.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    name: String,
    radio_id: u32,
    cloud_id: u64,
    offset: f64,
    /// Last ambient reading from the radio link
    pub ambient: Option<f64>,
    /// Locally authoritative desired temperature
    pub local_target: Option<f64>,
    /// Last value we believe the cloud holds; distinguishes our own nudges
    /// from edits made elsewhere
    pub cloud_reference: Option<f64>,
    /// Value reported by the most recent cloud poll
    pub cloud_target: Option<f64>,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, radio_id: u32, cloud_id: u64, offset: f64) -> Self {
        Self {
            name: name.into(),
            radio_id,
            cloud_id,
            offset,
            ambient: None,
            local_target: None,
            cloud_reference: None,
            cloud_target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn radio_id(&self) -> u32 {
        self.radio_id
    }

    pub fn cloud_id(&self) -> u64 {
        self.cloud_id
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Translate a local temperature onto the cloud scale: `floor(t - offset)`
    pub fn to_cloud(&self, local: f64) -> f64 {
        (local - self.offset).floor()
    }

    /// Translate a cloud temperature onto the local scale: `v + offset`
    pub fn from_cloud(&self, cloud: f64) -> f64 {
        cloud + self.offset
    }
}

impl From<&TrvConfig> for DeviceRecord {
    fn from(config: &TrvConfig) -> Self {
        DeviceRecord::new(
            config.name.clone(),
            config.radio_id,
            config.cloud_id,
            config.offset,
        )
    }
}
