//! Per-message handlers and the reconciliation pass

use super::TrvBridge;
use crate::cloud::{CloudApi, CloudObservation};
use crate::error::sanitize_error_message;
use crate::protocol::{format_temperature, DeviceState, TopicBuilder, TOPIC_CALL_FOR_HEAT};
use crate::radio::{RadioLink, RadioReading};
use crate::reconcile::{aggregate, BoilerDemand, Nudge, PollOutcome};
use crate::routing::{BigLightCommand, RoutedMessage};
use crate::transport::Outbox;
use tracing::{debug, error, info, warn, Instrument};

fn describe(value: Option<f64>) -> String {
    value.map(format_temperature).unwrap_or_else(|| "-".to_string())
}

impl<C: CloudApi, R: RadioLink> TrvBridge<C, R> {
    pub(super) async fn dispatch(&mut self, message: RoutedMessage, outbox: &mut Outbox) {
        match message {
            RoutedMessage::TrvSet { device, target } => {
                let span = crate::device_span!(device, "set");
                self.handle_set(&device, target, outbox)
                    .instrument(span)
                    .await;
            }
            RoutedMessage::ExternalTemperature(temperature) => {
                self.handle_external_temperature(temperature, outbox).await;
            }
            RoutedMessage::Switch {
                house_code,
                index,
                command,
            } => {
                info!(house_code, index, on = command.is_on(), "Switching radio socket");
                if let Err(e) = self.radio.switch(house_code, index, command.is_on()).await {
                    warn!(house_code, index, "Radio switch command failed: {}", e);
                }
            }
            RoutedMessage::BigLight { cloud_id, command } => {
                self.handle_big_light(cloud_id, command).await;
            }
        }
    }

    /// New ambient reading from a valve
    pub(super) async fn handle_reading(&mut self, reading: RadioReading, outbox: &mut Outbox) {
        let Some(record) = self.registry.by_radio_id_mut(reading.radio_id) else {
            debug!(radio_id = reading.radio_id, "Reading from unknown radio id");
            return;
        };

        let changed = {
            let span = crate::device_span!(record.name(), "reading");
            let _enter = span.enter();

            let update = self.reconciler.on_ambient_reading(record, reading.temperature);
            let current = format_temperature(reading.temperature);
            info!("{} reports temperature {}", record.name(), current);
            outbox.publish(TopicBuilder::trv_current(record.name()), current, true);

            if update.bootstrapped {
                info!(
                    target_temperature = ?record.local_target,
                    reference = ?record.cloud_reference,
                    offset = record.offset(),
                    "First reading of {} bootstrapped from the cloud target",
                    record.name()
                );
            }
            update.changed
        };

        if changed {
            self.run_pass(outbox).await;
        }
    }

    async fn handle_set(&mut self, device: &str, target: f64, outbox: &mut Outbox) {
        let Some(record) = self.registry.get_mut(device) else {
            // The router only produces names it was built from
            error!(device, "Set command for unregistered device");
            return;
        };
        info!("Handling set {} to {}", device, format_temperature(target));

        let radio_id = record.radio_id();
        let nudge = self.reconciler.on_local_target_set(record, target);
        if nudge.is_none() {
            info!("{} has no reading yet, cloud target left alone", device);
        }

        if self.push_setpoint_to_valve {
            if let Err(e) = self.radio.set_setpoint(radio_id, target).await {
                warn!(radio_id, "Failed to forward setpoint to valve: {}", e);
            }
        }

        if let Some(nudge) = nudge {
            info!(
                "{} setting cloud target temperature to {}",
                device,
                format_temperature(nudge.value)
            );
            self.apply_nudge(nudge).await;
        }

        outbox.publish(TopicBuilder::trv_target(device), format_temperature(target), true);
        self.run_pass(outbox).await;
    }

    async fn handle_external_temperature(&mut self, temperature: f64, outbox: &mut Outbox) {
        self.external_temperature = Some(temperature);
        info!("External sensor reports temperature at {}", format_temperature(temperature));
        self.run_pass(outbox).await;
    }

    async fn handle_big_light(&mut self, cloud_id: u64, command: BigLightCommand) {
        let api = self.cloud.api();
        let result = match command {
            BigLightCommand::Switch(switch) if switch.is_on() => {
                info!(cloud_id, "Turning big light on");
                api.power_on(cloud_id).await
            }
            BigLightCommand::Switch(_) => {
                info!(cloud_id, "Turning big light off");
                api.power_off(cloud_id).await
            }
            BigLightCommand::Brightness(level) => {
                info!(cloud_id, level, "Setting big light brightness");
                api.set_dimmer_level(cloud_id, level).await
            }
        };

        if let Err(e) = result {
            warn!(cloud_id, "Big light command failed: {}", sanitize_error_message(&e.to_string()));
        }
    }

    /// Poll the cloud, adopt external edits and republish targets.
    /// Failures are logged and retried on the next interval.
    pub(super) async fn poll_cloud(&mut self, outbox: &mut Outbox) {
        debug!("Fetching data from cloud service");
        let observations = match self.cloud.poll(&mut self.registry, &self.reconciler).await {
            Ok(observations) => observations,
            Err(e) => {
                error!("Error fetching cloud data: {}", sanitize_error_message(&e.to_string()));
                return;
            }
        };

        for observation in &observations {
            log_observation(observation);
        }

        for record in self.registry.iter() {
            if let Some(target) = record.local_target {
                outbox.publish(
                    TopicBuilder::trv_target(record.name()),
                    format_temperature(target),
                    true,
                );
            }
        }

        self.run_pass(outbox).await;
    }

    /// Recompute every device, publish per-device state and the aggregate
    /// boiler demand, then push any nudges to the cloud.
    pub(super) async fn run_pass(&mut self, outbox: &mut Outbox) {
        let mut flags = Vec::with_capacity(self.registry.len());
        let mut descriptions = Vec::with_capacity(self.registry.len());
        let mut calling = Vec::new();
        let mut nudges = Vec::new();

        for record in self.registry.iter_mut() {
            let demand = self.reconciler.recompute_demand(record);
            let state = DeviceState::from_calling_for_heat(demand.calling_for_heat);
            outbox.publish(TopicBuilder::trv_state(record.name()), state.as_payload(), true);

            let description = format!(
                "{} ({}/{})",
                record.name(),
                describe(record.ambient),
                describe(record.local_target)
            );
            if demand.calling_for_heat {
                calling.push(description.clone());
            }
            descriptions.push(description);
            flags.push(demand.calling_for_heat);

            if let Some(nudge) = demand.nudge {
                let direction = if demand.calling_for_heat {
                    "is calling for heat, setting"
                } else {
                    "is not calling for heat, dropping"
                };
                info!(
                    "{} {} cloud target temperature to {}",
                    record.name(),
                    direction,
                    format_temperature(nudge.value)
                );
                nudges.push(nudge);
            }
        }

        let demand = aggregate(flags);
        outbox.publish(TOPIC_CALL_FOR_HEAT, demand.as_payload(), false);
        match demand {
            BoilerDemand::On => info!("Devices calling for heat: {}", calling.join(", ")),
            BoilerDemand::Off => info!("No devices calling for heat: {}", descriptions.join(", ")),
        }

        for nudge in nudges {
            self.apply_nudge(nudge).await;
        }
    }

    /// Write a nudge to the cloud, rolling the reference back on failure so
    /// the next pass tries again
    async fn apply_nudge(&mut self, nudge: Nudge) {
        let result = self
            .cloud
            .api()
            .set_target_temperature(nudge.cloud_id, nudge.value)
            .await;

        if let Err(e) = result {
            warn!(
                cloud_id = nudge.cloud_id,
                value = nudge.value,
                "Error setting cloud target temperature: {}",
                sanitize_error_message(&e.to_string())
            );
            if let Some(record) = self.registry.by_cloud_id_mut(nudge.cloud_id) {
                self.reconciler.revert_nudge(record, &nudge);
            }
        }
    }
}

fn log_observation(observation: &CloudObservation) {
    match observation.outcome {
        PollOutcome::AwaitingReading => info!(
            "{} has no reference point yet. Target will be updated once the first reading comes through",
            observation.name
        ),
        PollOutcome::Bootstrapped => info!(
            "{} reference initialised from cloud target {}",
            observation.name,
            format_temperature(observation.cloud_value)
        ),
        PollOutcome::ExternalEdit { previous } => info!(
            "Cloud target for {} changed from {} to {}",
            observation.name,
            format_temperature(previous),
            format_temperature(observation.cloud_value)
        ),
        PollOutcome::Unchanged => debug!(device = %observation.name, "Cloud target unchanged"),
    }
}
