//! Cloud sync adapter: scheduled polling of the device list

use super::{CloudApi, CloudError};
use crate::device::DeviceRegistry;
use crate::reconcile::{PollOutcome, Reconciler};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a poll did to one matched device
#[derive(Debug, Clone, PartialEq)]
pub struct CloudObservation {
    pub name: String,
    pub cloud_value: f64,
    pub outcome: PollOutcome,
}

pub struct CloudSync<C: CloudApi> {
    api: C,
    interval: Duration,
    last_poll: Option<Instant>,
}

impl<C: CloudApi> CloudSync<C> {
    pub fn new(api: C, interval: Duration) -> Self {
        Self {
            api,
            interval,
            last_poll: None,
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A poll is due if none has run yet or the interval has elapsed
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Fetch the device list and feed every configured device found in it
    /// to the reconciler.
    ///
    /// The schedule advances even when the fetch fails, so a failing service
    /// is retried on the next interval rather than on every tick.
    pub async fn poll(
        &mut self,
        registry: &mut DeviceRegistry,
        reconciler: &Reconciler,
    ) -> Result<Vec<CloudObservation>, CloudError> {
        self.last_poll = Some(Instant::now());
        let devices = self.api.list_devices().await?;

        let mut seen = HashSet::new();
        let mut observations = Vec::new();

        for device in devices {
            let Some(record) = registry.by_cloud_id_mut(device.id) else {
                continue;
            };
            seen.insert(device.id);

            let Some(cloud_value) = device.target_temperature else {
                warn!(device = record.name(), cloud_id = device.id, "Cloud device has no target temperature");
                continue;
            };

            let outcome = reconciler.on_cloud_poll(record, cloud_value);
            observations.push(CloudObservation {
                name: record.name().to_string(),
                cloud_value,
                outcome,
            });
        }

        for record in registry.iter() {
            if !seen.contains(&record.cloud_id()) {
                debug!(device = record.name(), cloud_id = record.cloud_id(), "Device missing from cloud response");
            }
        }

        Ok(observations)
    }
}
