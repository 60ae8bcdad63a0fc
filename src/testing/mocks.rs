//! Mock implementations for testing
//!
//! Provides a scripted MQTT [`Session`], an in-memory [`CloudApi`] and a
//! [`RadioLink`] recorder, so the bridge and the transport loop can be tested
//! without a broker, the cloud service or radio hardware.

use crate::cloud::{CloudApi, CloudDevice, CloudError};
use crate::config::{BridgeConfig, TrvConfig};
use crate::radio::{RadioCommand, RadioError, RadioLink, RadioReading};
use crate::transport::{
    InboundMessage, OutboundMessage, Session, SessionEvent, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

// ========== Session ==========

#[derive(Debug, Default)]
struct RecorderState {
    connect_results: VecDeque<Result<(), TransportError>>,
    connect_times: Vec<Instant>,
    subscriptions: Vec<Vec<String>>,
    published: Vec<OutboundMessage>,
    disconnects: usize,
    capacity: Option<usize>,
}

/// Test-side view of a [`MockSession`]: scripts its behaviour and records
/// what the loop did with it
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    state: Arc<StdMutex<RecorderState>>,
    events: mpsc::UnboundedSender<Result<SessionEvent, TransportError>>,
}

impl SessionRecorder {
    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            state
                .connect_results
                .push_back(Err(TransportError::ConnectionFailed("connection refused".to_string())));
        }
    }

    /// Limit how many publishes can be in flight at once
    pub fn set_capacity(&self, capacity: usize) {
        self.state().capacity = Some(capacity);
    }

    /// Deliver an inbound message on the next poll
    pub fn send_message(&self, topic: &str, payload: &str) {
        let _ = self.events.send(Ok(SessionEvent::Message(InboundMessage::new(
            topic.to_string(),
            payload.to_string(),
        ))));
    }

    /// Make the next poll report a lost network connection
    pub fn lose_connection(&self) {
        let _ = self
            .events
            .send(Err(TransportError::ConnectionLost("connection reset".to_string())));
    }

    /// Make the next poll report a broker-initiated disconnect
    pub fn broker_disconnect(&self) {
        let _ = self.events.send(Ok(SessionEvent::Disconnected));
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_times.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state().connect_times.clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.state().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.state()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }
}

/// Scripted [`Session`].
///
/// Connects succeed unless failures were queued. Each publish stays in
/// flight until the next poll writes it out. With no scripted events a poll
/// waits forever, which the loop bounds with its wait timeout.
#[derive(Debug)]
pub struct MockSession {
    state: Arc<StdMutex<RecorderState>>,
    events: mpsc::UnboundedReceiver<Result<SessionEvent, TransportError>>,
    connected: bool,
    in_flight: usize,
}

impl MockSession {
    pub fn new() -> (Self, SessionRecorder) {
        let state = Arc::new(StdMutex::new(RecorderState::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                events: rx,
                connected: false,
                in_flight: 0,
            },
            SessionRecorder { state, events: tx },
        )
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let result = {
            let mut state = self.state();
            state.connect_times.push(Instant::now());
            state.connect_results.pop_front().unwrap_or(Ok(()))
        };
        self.connected = result.is_ok();
        self.in_flight = 0;
        result
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.state().subscriptions.push(topics.to_vec());
        Ok(())
    }

    fn try_publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.state();
        if state.capacity.is_some_and(|capacity| self.in_flight >= capacity) {
            return Err(TransportError::QueueFull);
        }
        state.published.push(message.clone());
        drop(state);
        self.in_flight += 1;
        Ok(())
    }

    async fn poll(&mut self) -> Result<SessionEvent, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.in_flight > 0 {
            self.in_flight -= 1;
            return Ok(SessionEvent::Other);
        }

        match self.events.recv().await {
            Some(Ok(SessionEvent::Disconnected)) => {
                self.connected = false;
                Ok(SessionEvent::Disconnected)
            }
            Some(Ok(event)) => Ok(event),
            Some(Err(e)) => {
                self.connected = false;
                Err(e)
            }
            None => std::future::pending().await,
        }
    }

    fn has_pending(&self) -> bool {
        self.in_flight > 0
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.in_flight = 0;
        self.state().disconnects += 1;
        Ok(())
    }
}

// ========== Cloud ==========

/// Write recorded by [`MockCloud`]
#[derive(Debug, Clone, PartialEq)]
pub enum CloudWrite {
    Target { cloud_id: u64, temperature: f64 },
    PowerOn(u64),
    PowerOff(u64),
    Dimmer { cloud_id: u64, level: u8 },
}

/// In-memory cloud service. Successful target writes are stored, so later
/// polls return them the way the real service does.
#[derive(Debug, Default)]
pub struct MockCloud {
    devices: Mutex<Vec<CloudDevice>>,
    list_failures: Mutex<VecDeque<CloudError>>,
    write_failures: Mutex<VecDeque<CloudError>>,
    writes: Mutex<Vec<CloudWrite>>,
    list_calls: AtomicUsize,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<CloudDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    /// Change a target as if edited in the cloud's own app
    pub async fn set_device_target(&self, cloud_id: u64, temperature: f64) {
        let mut devices = self.devices.lock().await;
        match devices.iter_mut().find(|d| d.id == cloud_id) {
            Some(device) => device.target_temperature = Some(temperature),
            None => devices.push(CloudDevice::new(cloud_id, Some(temperature))),
        }
    }

    pub async fn device_target(&self, cloud_id: u64) -> Option<f64> {
        self.devices
            .lock()
            .await
            .iter()
            .find(|d| d.id == cloud_id)
            .and_then(|d| d.target_temperature)
    }

    /// Make the next device list call fail
    pub async fn fail_list(&self, error: CloudError) {
        self.list_failures.lock().await.push_back(error);
    }

    /// Make the next write call fail
    pub async fn fail_next_write(&self, error: CloudError) {
        self.write_failures.lock().await.push_back(error);
    }

    pub async fn writes(&self) -> Vec<CloudWrite> {
        self.writes.lock().await.clone()
    }

    /// Successful and failed target writes, in order
    pub async fn target_writes(&self) -> Vec<(u64, f64)> {
        self.writes
            .lock()
            .await
            .iter()
            .filter_map(|w| match w {
                CloudWrite::Target {
                    cloud_id,
                    temperature,
                } => Some((*cloud_id, *temperature)),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_writes(&self) {
        self.writes.lock().await.clear();
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    async fn record(&self, write: CloudWrite) -> Result<(), CloudError> {
        self.writes.lock().await.push(write);
        match self.write_failures.lock().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn list_devices(&self) -> Result<Vec<CloudDevice>, CloudError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(self.devices.lock().await.clone())
    }

    async fn set_target_temperature(&self, cloud_id: u64, temperature: f64) -> Result<(), CloudError> {
        self.record(CloudWrite::Target {
            cloud_id,
            temperature,
        })
        .await?;
        self.set_device_target(cloud_id, temperature).await;
        Ok(())
    }

    async fn power_on(&self, cloud_id: u64) -> Result<(), CloudError> {
        self.record(CloudWrite::PowerOn(cloud_id)).await
    }

    async fn power_off(&self, cloud_id: u64) -> Result<(), CloudError> {
        self.record(CloudWrite::PowerOff(cloud_id)).await
    }

    async fn set_dimmer_level(&self, cloud_id: u64, level: u8) -> Result<(), CloudError> {
        self.record(CloudWrite::Dimmer { cloud_id, level }).await
    }
}

// ========== Radio ==========

/// Radio link that replays queued readings and records commands
#[derive(Debug, Default)]
pub struct MockRadio {
    readings: VecDeque<RadioReading>,
    commands: Vec<RadioCommand>,
    failure: Option<RadioError>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reading(&mut self, radio_id: u32, temperature: f64) {
        self.readings.push_back(RadioReading {
            radio_id,
            temperature,
        });
    }

    /// Make every command fail with `error`
    pub fn fail_commands(&mut self, error: RadioError) {
        self.failure = Some(error);
    }

    pub fn commands(&self) -> &[RadioCommand] {
        &self.commands
    }

    fn record(&mut self, command: RadioCommand) -> Result<(), RadioError> {
        self.commands.push(command);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RadioLink for MockRadio {
    fn poll_readings(&mut self) -> Vec<RadioReading> {
        self.readings.drain(..).collect()
    }

    async fn set_setpoint(&mut self, radio_id: u32, temperature: f64) -> Result<(), RadioError> {
        self.record(RadioCommand::SetSetpoint {
            radio_id,
            temperature,
        })
    }

    async fn switch(&mut self, house_code: u32, index: u8, on: bool) -> Result<(), RadioError> {
        self.record(RadioCommand::Switch {
            house_code,
            index,
            on,
        })
    }
}

// ========== Fixtures ==========

/// Bridge configuration for tests: a local broker, default tunables and the
/// given `(name, radio_id, cloud_id, offset)` valves
pub fn test_bridge_config(trvs: &[(&str, u32, u64, f64)]) -> BridgeConfig {
    let mut config = BridgeConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[cloud]
username_env = "MIHOME_USER"
token_env = "MIHOME_TOKEN"
"#,
    )
    .unwrap_or_else(|e| panic!("test config must parse: {e}"));

    config.trvs = trvs
        .iter()
        .map(|&(name, radio_id, cloud_id, offset)| TrvConfig {
            name: name.to_string(),
            radio_id,
            cloud_id,
            offset,
        })
        .collect();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_session_scripted_connects() {
        let (mut session, recorder) = MockSession::new();
        recorder.fail_next_connects(1);

        assert!(session.connect().await.is_err());
        assert!(session.connect().await.is_ok());
        assert_eq!(recorder.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_mock_session_publish_in_flight_until_polled() {
        let (mut session, recorder) = MockSession::new();
        session.connect().await.unwrap();
        recorder.set_capacity(1);

        let message = OutboundMessage {
            topic: "home/nest/call_for_heat".to_string(),
            payload: "on".to_string(),
            retain: false,
        };
        session.try_publish(&message).unwrap();
        assert!(session.has_pending());
        assert!(matches!(
            session.try_publish(&message),
            Err(TransportError::QueueFull)
        ));

        assert_eq!(session.poll().await.unwrap(), SessionEvent::Other);
        assert!(!session.has_pending());
        assert_eq!(recorder.published_on("home/nest/call_for_heat"), vec!["on"]);
    }

    #[tokio::test]
    async fn test_mock_cloud_stores_writes() {
        let cloud = MockCloud::with_devices(vec![CloudDevice::new(7, Some(18.0))]);
        cloud.set_target_temperature(7, 21.0).await.unwrap();
        assert_eq!(cloud.device_target(7).await, Some(21.0));

        cloud.fail_next_write(CloudError::Timeout).await;
        assert!(cloud.set_target_temperature(7, 15.0).await.is_err());
        assert_eq!(cloud.device_target(7).await, Some(21.0));
        assert_eq!(cloud.target_writes().await, vec![(7, 21.0), (7, 15.0)]);
    }
}
