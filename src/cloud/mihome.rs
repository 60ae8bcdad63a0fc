//! MiHome cloud API client
//!
//! All calls use HTTP basic auth (account user name and API token). Reads are
//! `GET subdevices/list`; writes are form posts to `subdevices/{action}` with
//! a single `params` field holding a JSON object. Every response is wrapped in
//! `{"status": "success", "data": ...}`.

use super::{CloudApi, CloudDevice, CloudError};
use crate::config::CloudSection;
use crate::error::sanitize_error_message;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// MiHome client configuration
#[derive(Debug, Clone)]
pub struct MiHomeConfig {
    pub base_url: String,
    pub username: String,
    pub token: String,
    pub timeout: Duration,
}

impl MiHomeConfig {
    pub fn from_section(section: &CloudSection, username: String, token: String) -> Self {
        Self {
            base_url: section.base_url.clone(),
            username,
            token,
            timeout: section.timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

pub struct MiHomeClient {
    config: MiHomeConfig,
    client: Client,
}

impl MiHomeClient {
    pub fn new(config: MiHomeConfig) -> Result<Self, CloudError> {
        if config.username.is_empty() || config.token.is_empty() {
            return Err(CloudError::NotConfigured(
                "MiHome user name and token are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CloudError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/subdevices/{action}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.username, Some(&self.config.token))
    }

    /// Send a request and unwrap the response envelope
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, CloudError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        debug!(status = status.as_u16(), "MiHome response");

        if !status.is_success() {
            return Err(CloudError::Http {
                status: status.as_u16(),
                body: sanitize_error_message(&body),
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))?;

        if envelope.status != "success" {
            return Err(CloudError::Api(sanitize_error_message(&format!(
                "status '{}': {body}",
                envelope.status
            ))));
        }

        Ok(envelope.data)
    }

    async fn post_action(&self, action: &str, params: serde_json::Value) -> Result<(), CloudError> {
        debug!(action, %params, "MiHome request");
        let request = self
            .client
            .post(self.endpoint(action))
            .form(&[("params", params.to_string())]);

        self.call::<serde_json::Value>(request).await.map(|_| ())
    }
}

fn map_reqwest_error(error: reqwest::Error) -> CloudError {
    if error.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Network(sanitize_error_message(&error.to_string()))
    }
}

/// The service works in whole degrees; send `22`, not `22.0`
fn temperature_param(temperature: f64) -> serde_json::Value {
    if temperature.fract() == 0.0 && temperature.abs() < i64::MAX as f64 {
        serde_json::Value::from(temperature as i64)
    } else {
        serde_json::Value::from(temperature)
    }
}

#[async_trait]
impl CloudApi for MiHomeClient {
    async fn list_devices(&self) -> Result<Vec<CloudDevice>, CloudError> {
        let request = self.client.get(self.endpoint("list"));
        self.call::<Vec<CloudDevice>>(request)
            .await?
            .ok_or_else(|| CloudError::InvalidResponse("device list missing 'data'".to_string()))
    }

    async fn set_target_temperature(&self, cloud_id: u64, temperature: f64) -> Result<(), CloudError> {
        self.post_action(
            "set_target_temperature",
            serde_json::json!({ "id": cloud_id, "temperature": temperature_param(temperature) }),
        )
        .await
    }

    async fn power_on(&self, cloud_id: u64) -> Result<(), CloudError> {
        self.post_action("power_on", serde_json::json!({ "id": cloud_id }))
            .await
    }

    async fn power_off(&self, cloud_id: u64) -> Result<(), CloudError> {
        self.post_action("power_off", serde_json::json!({ "id": cloud_id }))
            .await
    }

    async fn set_dimmer_level(&self, cloud_id: u64, level: u8) -> Result<(), CloudError> {
        self.post_action(
            "set_dimmer_level",
            serde_json::json!({ "id": cloud_id, "level": level }),
        )
        .await
    }
}
