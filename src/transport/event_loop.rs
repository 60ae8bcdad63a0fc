//! Resilient transport loop
//!
//! A single cooperative loop that owns the [`Session`] and walks
//! `ConnectPending -> Running -> Terminating`:
//!
//! - `ConnectPending` connects (waiting on the backoff policy between
//!   attempts), resubscribes and calls [`LoopHandler::on_connected`].
//! - `Running` repeats one iteration: tick once, flush the outbox, then
//!   dispatch up to `max_events_per_iteration` session events, each wait
//!   bounded by `wait_timeout`.
//! - On shutdown, ticks stop and the loop keeps servicing I/O until queued
//!   and in-flight publishes are flushed or `drain_timeout` passes, then
//!   disconnects.
//!
//! Only the very first connection failure can end the loop with an error, and
//! only when `retry_first_connection` is off. Losing an established session
//! always goes back to `ConnectPending`.

use super::{InboundMessage, Outbox, Session, SessionEvent, TransportError};
use crate::config::MqttSection;
use crate::transport::mqtt::ReconnectConfig;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Callbacks the loop drives. All run on the loop's task, one at a time.
#[async_trait::async_trait]
pub trait LoopHandler: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Topic filters to (re)subscribe after every connect
    fn subscriptions(&self) -> Vec<String>;

    async fn on_connected(&mut self, outbox: &mut Outbox) -> Result<(), Self::Error>;

    /// Called exactly once per `Running` iteration
    async fn on_tick(&mut self, outbox: &mut Outbox) -> Result<(), Self::Error>;

    async fn on_message(
        &mut self,
        message: InboundMessage,
        outbox: &mut Outbox,
    ) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    ConnectPending,
    Running,
    Terminating,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub retry_first_connection: bool,
    pub max_events_per_iteration: usize,
    pub wait_timeout: Duration,
    pub drain_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            retry_first_connection: false,
            max_events_per_iteration: 8,
            wait_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl LoopOptions {
    pub fn from_config(config: &MqttSection) -> Self {
        Self {
            retry_first_connection: config.retry_first_connection,
            max_events_per_iteration: config.max_events_per_iteration,
            wait_timeout: config.wait_timeout(),
            drain_timeout: config.drain_timeout(),
            reconnect: ReconnectConfig::from(&config.reconnect),
        }
    }
}

enum IterationOutcome {
    Continue,
    SessionLost,
}

pub struct TransportLoop<S: Session> {
    session: S,
    options: LoopOptions,
    shutdown: watch::Receiver<bool>,
    outbox: Outbox,
    state: LoopState,
    connected: bool,
}

impl<S: Session> TransportLoop<S> {
    pub fn new(session: S, options: LoopOptions, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            session,
            options,
            shutdown,
            outbox: Outbox::new(),
            state: LoopState::ConnectPending,
            connected: false,
        }
    }

    /// Outbox the loop will flush; handlers may pre-load it before `run`
    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Drive the session until shutdown. Returns the session so callers can
    /// inspect it afterwards.
    pub async fn run<H: LoopHandler>(mut self, handler: &mut H) -> Result<S, TransportError> {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        loop {
            match self.state {
                LoopState::ConnectPending => {
                    if self.shutdown_requested() {
                        info!("Shutdown requested before connection was established");
                        self.state = LoopState::Terminating;
                        continue;
                    }

                    if attempt > 0 {
                        let delay = Duration::from_millis(
                            self.options.reconnect.calculate_backoff_delay(attempt),
                        );
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                        if !interruptible_sleep(&mut self.shutdown, delay).await {
                            self.state = LoopState::Terminating;
                            continue;
                        }
                    }

                    let span = crate::session_span!("connect", attempt);
                    match self.establish(handler).instrument(span).await {
                        Ok(()) => {
                            info!(attempt, "MQTT session established");
                            attempt = 0;
                            ever_connected = true;
                            self.state = LoopState::Running;
                        }
                        Err(TransportError::Handler(e)) => {
                            return Err(TransportError::Handler(e));
                        }
                        Err(e) => {
                            if !ever_connected && !self.options.retry_first_connection {
                                error!("Initial MQTT connection failed: {}", e);
                                return Err(e);
                            }
                            attempt = attempt.saturating_add(1);
                            warn!(attempt, "MQTT connection attempt failed: {}", e);
                        }
                    }
                }
                LoopState::Running => {
                    if self.shutdown_requested() {
                        info!(queued = self.outbox.len(), "Shutdown requested, draining outbound messages");
                        self.drain(handler).await?;
                        self.state = LoopState::Terminating;
                        continue;
                    }

                    if let IterationOutcome::SessionLost = self.iteration(handler, true).await? {
                        warn!("MQTT session lost, reconnecting");
                        self.connected = false;
                        attempt = 1;
                        self.state = LoopState::ConnectPending;
                    }
                }
                LoopState::Terminating => {
                    if self.connected {
                        if let Err(e) = self.session.disconnect().await {
                            warn!("Error during MQTT disconnect: {}", e);
                        }
                        self.connected = false;
                    }
                    if !self.outbox.is_empty() {
                        warn!(dropped = self.outbox.len(), "Outbound messages dropped at shutdown");
                    }
                    info!("Transport loop stopped");
                    return Ok(self.session);
                }
            }
        }
    }

    async fn establish<H: LoopHandler>(&mut self, handler: &mut H) -> Result<(), TransportError> {
        self.session.connect().await?;
        self.connected = true;

        let topics = handler.subscriptions();
        if let Err(e) = self.session.subscribe(&topics).await {
            self.connected = false;
            return Err(e);
        }
        debug!(count = topics.len(), "Subscribed to topics");

        handler
            .on_connected(&mut self.outbox)
            .await
            .map_err(|e| TransportError::Handler(Box::new(e)))
    }

    async fn iteration<H: LoopHandler>(
        &mut self,
        handler: &mut H,
        tick: bool,
    ) -> Result<IterationOutcome, TransportError> {
        if tick {
            handler
                .on_tick(&mut self.outbox)
                .await
                .map_err(|e| TransportError::Handler(Box::new(e)))?;
        }

        if let Err(e) = self.flush_outbox() {
            warn!("Publishing failed: {}", e);
            return Ok(IterationOutcome::SessionLost);
        }

        for _ in 0..self.options.max_events_per_iteration {
            let event = match tokio::time::timeout(self.options.wait_timeout, self.session.poll()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!("MQTT event loop error: {}", e);
                    return Ok(IterationOutcome::SessionLost);
                }
                Ok(Ok(event)) => event,
            };

            match event {
                SessionEvent::Message(message) => {
                    debug!(topic = %message.topic, "Dispatching inbound message");
                    handler
                        .on_message(message, &mut self.outbox)
                        .await
                        .map_err(|e| TransportError::Handler(Box::new(e)))?;
                    if let Err(e) = self.flush_outbox() {
                        warn!("Publishing failed: {}", e);
                        return Ok(IterationOutcome::SessionLost);
                    }
                }
                SessionEvent::Disconnected => {
                    warn!("Broker closed the session");
                    return Ok(IterationOutcome::SessionLost);
                }
                SessionEvent::Connected | SessionEvent::Other => {}
            }

            if !tick && self.is_drained() {
                break;
            }
        }

        Ok(IterationOutcome::Continue)
    }

    /// Push queued messages into the session until it pushes back
    fn flush_outbox(&mut self) -> Result<(), TransportError> {
        while let Some(message) = self.outbox.front() {
            match self.session.try_publish(message) {
                Ok(()) => {
                    self.outbox.pop_front();
                }
                Err(TransportError::QueueFull) => {
                    debug!(queued = self.outbox.len(), "Client queue full, deferring publishes");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn drain<H: LoopHandler>(&mut self, handler: &mut H) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.options.drain_timeout;

        while !self.is_drained() {
            if Instant::now() >= deadline {
                warn!(
                    queued = self.outbox.len(),
                    in_flight = self.session.has_pending(),
                    "Drain timeout reached"
                );
                break;
            }
            if let IterationOutcome::SessionLost = self.iteration(handler, false).await? {
                self.connected = false;
                break;
            }
        }
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.outbox.is_empty() && !self.session.has_pending()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
/// Returns true if the sleep completed, false if shutdown was requested.
pub async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => {
                    info!("Shutdown signal received during reconnection delay");
                    return false;
                }
                Ok(()) => continue,
                Err(_) => {
                    // Sender gone; nobody can request shutdown any more
                    (&mut sleep).await;
                    return true;
                }
            },
        }
    }
}
