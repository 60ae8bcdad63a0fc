//! The bridge: owns all device state and turns reconciler decisions into
//! bus publishes and cloud writes.
//!
//! [`TrvBridge`] is the [`LoopHandler`] the transport loop drives. Every
//! callback runs on the loop's task, so device records are plain owned data.

use crate::cloud::{CloudApi, CloudSync};
use crate::config::BridgeConfig;
use crate::device::DeviceRegistry;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::TOPIC_CONSTANTS_AUTO;
use crate::radio::RadioLink;
use crate::reconcile::Reconciler;
use crate::routing::{MessageRouter, RouteError};
use crate::transport::{InboundMessage, LoopHandler, Outbox};
use tokio::time::Instant;
use tracing::info;

mod handlers;

pub struct TrvBridge<C: CloudApi, R: RadioLink> {
    registry: DeviceRegistry,
    reconciler: Reconciler,
    cloud: CloudSync<C>,
    radio: R,
    router: MessageRouter,
    push_setpoint_to_valve: bool,
    external_temperature: Option<f64>,
}

impl<C: CloudApi, R: RadioLink> TrvBridge<C, R> {
    /// Build the bridge from validated configuration
    pub fn new(config: &BridgeConfig, cloud_api: C, radio: R) -> Result<Self, RouteError> {
        let registry = DeviceRegistry::from_config(&config.trvs);
        let router = MessageRouter::new(registry.names())?;

        Ok(Self {
            registry,
            reconciler: Reconciler::new(config.reconcile.margin),
            cloud: CloudSync::new(cloud_api, config.cloud.poll_interval()),
            radio,
            router,
            push_setpoint_to_valve: config.reconcile.push_setpoint_to_valve,
            external_temperature: None,
        })
    }

    /// Eager first cloud poll, run before the transport loop starts.
    /// Anything it publishes waits in `outbox` until the first connect.
    pub async fn start(&mut self, outbox: &mut Outbox) {
        info!(
            devices = self.registry.len(),
            poll_interval = ?self.cloud.interval(),
            "Starting TRV bridge"
        );
        self.poll_cloud(outbox).await;
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn cloud_api(&self) -> &C {
        self.cloud.api()
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Last reading from the external room sensor
    pub fn external_temperature(&self) -> Option<f64> {
        self.external_temperature
    }
}

#[async_trait::async_trait]
impl<C, R> LoopHandler for TrvBridge<C, R>
where
    C: CloudApi,
    R: RadioLink,
{
    type Error = BridgeError;

    fn subscriptions(&self) -> Vec<String> {
        self.router.subscriptions()
    }

    async fn on_connected(&mut self, outbox: &mut Outbox) -> BridgeResult<()> {
        outbox.publish(TOPIC_CONSTANTS_AUTO, "Auto", true);
        Ok(())
    }

    async fn on_tick(&mut self, outbox: &mut Outbox) -> BridgeResult<()> {
        for reading in self.radio.poll_readings() {
            self.handle_reading(reading, outbox).await;
        }

        if self.cloud.is_due(Instant::now()) {
            self.poll_cloud(outbox).await;
        }
        Ok(())
    }

    async fn on_message(
        &mut self,
        message: InboundMessage,
        outbox: &mut Outbox,
    ) -> BridgeResult<()> {
        let payload = message.payload_str();
        if let Some(routed) = self.router.route(&message.topic, &payload)? {
            self.dispatch(routed, outbox).await;
        }
        Ok(())
    }
}
