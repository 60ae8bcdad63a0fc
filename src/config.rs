//! Configuration system for the TRV bridge
//!
//! Configuration is a single TOML file: broker connection, cloud API access,
//! reconciliation tunables and the static list of valves. Secrets are never
//! stored in the file; the file names the environment variables holding them.

use crate::protocol::validate_device_name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub cloud: CloudSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    /// Valves, declared as `[[trv]]` tables
    #[serde(default, rename = "trv")]
    pub trvs: Vec<TrvConfig>,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Client id prefix; a random suffix is appended per connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Keep retrying when the very first connection attempt fails
    #[serde(default)]
    pub retry_first_connection: bool,
    /// Upper bound on session events handled per loop iteration
    #[serde(default = "default_max_events")]
    pub max_events_per_iteration: usize,
    /// Bounded wait for each network event
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long shutdown waits for queued publishes to flush
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Capacity of the client request channel
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Reconnection backoff: the pattern is walked once, then the sustained delay repeats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

/// Cloud thermostat API section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudSection {
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    /// Environment variable containing the account user name
    pub username_env: String,
    /// Environment variable containing the API token
    pub token_env: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-request timeout; a stalled call blocks the whole loop
    #[serde(default = "default_cloud_timeout_ms")]
    pub timeout_ms: u64,
}

/// Reconciliation tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileSection {
    /// Amount a nudge overshoots the translated target
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Forward set commands to the valve over the radio link as well
    #[serde(default)]
    pub push_setpoint_to_valve: bool,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            margin: default_margin(),
            push_setpoint_to_valve: false,
        }
    }
}

/// One radiator valve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrvConfig {
    pub name: String,
    pub radio_id: u32,
    pub cloud_id: u64,
    /// Calibration offset between the local and cloud temperature scales
    #[serde(default)]
    pub offset: f64,
}

fn default_client_id() -> String {
    "trv-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_max_events() -> usize {
    8
}

fn default_wait_timeout_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_request_capacity() -> usize {
    64
}

fn default_backoff_ms() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

fn default_cloud_base_url() -> String {
    "https://mihome4u.co.uk/api/v1".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_cloud_timeout_ms() -> u64 {
    5000
}

fn default_margin() -> f64 {
    1.0
}

impl MqttSection {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Broker username from its environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Broker password from its environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

impl CloudSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),
    #[error("Duplicate {field} in [[trv]] entries: {value}")]
    DuplicateDevice { field: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "cloud.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.cloud.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "cloud.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.reconcile.margin.is_finite() && self.reconcile.margin > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "reconcile.margin must be a positive number".to_string(),
            ));
        }
        if self.mqtt.max_events_per_iteration == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_events_per_iteration must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.wait_timeout_ms == 0 || self.mqtt.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt timeouts must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.request_capacity must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.reconnect.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect.sustained_delay_ms must be greater than 0".to_string(),
            ));
        }

        validate_trvs(&self.trvs)
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get cloud API user and token from their environment variables
    pub fn get_cloud_credentials(&self) -> Result<(String, String), ConfigError> {
        let username = Self::get_env_var_required(&self.cloud.username_env)?;
        let token = Self::get_env_var_required(&self.cloud.token_env)?;
        Ok((username, token))
    }
}

/// Unset variables and unconfigured names both read as `None`
fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_trvs(trvs: &[TrvConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut radio_ids = HashSet::new();
    let mut cloud_ids = HashSet::new();

    for trv in trvs {
        validate_device_name(&trv.name)
            .map_err(|e| ConfigError::InvalidDeviceName(format!("'{}': {e}", trv.name)))?;

        if !trv.offset.is_finite() {
            return Err(ConfigError::InvalidConfig(format!(
                "offset for '{}' must be a finite number",
                trv.name
            )));
        }
        if !names.insert(trv.name.as_str()) {
            return Err(ConfigError::DuplicateDevice {
                field: "name",
                value: trv.name.clone(),
            });
        }
        if !radio_ids.insert(trv.radio_id) {
            return Err(ConfigError::DuplicateDevice {
                field: "radio_id",
                value: trv.radio_id.to_string(),
            });
        }
        if !cloud_ids.insert(trv.cloud_id) {
            return Err(ConfigError::DuplicateDevice {
                field: "cloud_id",
                value: trv.cloud_id.to_string(),
            });
        }
    }

    Ok(())
}
