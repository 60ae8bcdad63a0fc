//! Cloud thermostat service
//!
//! [`CloudApi`] is the seam between the bridge and the hosted service;
//! [`MiHomeClient`] talks to the real HTTP API and [`CloudSync`] turns its
//! device list into reconciler input on a fixed schedule.

use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub mod mihome;
pub mod sync;

pub use mihome::{MiHomeClient, MiHomeConfig};
pub use sync::{CloudObservation, CloudSync};

/// Cloud API errors. Never fatal: the bridge logs them and tries again later.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CloudError {
    #[error("Cloud API not configured: {0}")]
    NotConfigured(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("API error: {0}")]
    Api(String),
}

/// One entry of the cloud device list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudDevice {
    pub id: u64,
    /// Absent for devices that are not thermostats
    #[serde(default, deserialize_with = "lenient_temperature")]
    pub target_temperature: Option<f64>,
}

impl CloudDevice {
    pub fn new(id: u64, target_temperature: Option<f64>) -> Self {
        Self {
            id,
            target_temperature,
        }
    }
}

/// The service reports temperatures as numbers or numeric strings
fn lenient_temperature<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let temperature = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(temperature.filter(|t| t.is_finite()))
}

/// Operations the bridge needs from the cloud service
#[async_trait::async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<CloudDevice>, CloudError>;

    async fn set_target_temperature(&self, cloud_id: u64, temperature: f64)
        -> Result<(), CloudError>;

    async fn power_on(&self, cloud_id: u64) -> Result<(), CloudError>;

    async fn power_off(&self, cloud_id: u64) -> Result<(), CloudError>;

    async fn set_dimmer_level(&self, cloud_id: u64, level: u8) -> Result<(), CloudError>;
}
