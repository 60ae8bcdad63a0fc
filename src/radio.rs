//! Radio link to the valves and wall switches
//!
//! The radio protocol stack lives outside this crate. The bridge only sees
//! [`RadioLink`]: decoded temperature readings in, setpoint and switch
//! commands out. [`ChannelRadio`] implements it over tokio channels so a
//! driver task can sit on the other end holding a [`RadioHandle`].

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Ambient temperature reported by a valve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioReading {
    pub radio_id: u32,
    pub temperature: f64,
}

/// Command for the radio driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadioCommand {
    SetSetpoint { radio_id: u32, temperature: f64 },
    Switch { house_code: u32, index: u8, on: bool },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RadioError {
    #[error("Radio command queue is full")]
    QueueFull,
    #[error("Radio driver is not running")]
    Disconnected,
}

#[async_trait::async_trait]
pub trait RadioLink: Send {
    /// Readings received since the last call, oldest first
    fn poll_readings(&mut self) -> Vec<RadioReading>;

    async fn set_setpoint(&mut self, radio_id: u32, temperature: f64) -> Result<(), RadioError>;

    /// Legacy on/off switch addressed by house code and switch index
    async fn switch(&mut self, house_code: u32, index: u8, on: bool) -> Result<(), RadioError>;
}

/// Channel-backed [`RadioLink`]
#[derive(Debug)]
pub struct ChannelRadio {
    readings: mpsc::Receiver<RadioReading>,
    commands: mpsc::Sender<RadioCommand>,
}

/// Driver side of a [`ChannelRadio`]
#[derive(Debug)]
pub struct RadioHandle {
    readings: mpsc::Sender<RadioReading>,
    commands: mpsc::Receiver<RadioCommand>,
}

/// Create a linked radio and driver handle
pub fn channel(capacity: usize) -> (ChannelRadio, RadioHandle) {
    let (reading_tx, reading_rx) = mpsc::channel(capacity);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    (
        ChannelRadio {
            readings: reading_rx,
            commands: command_tx,
        },
        RadioHandle {
            readings: reading_tx,
            commands: command_rx,
        },
    )
}

impl ChannelRadio {
    fn send(&self, command: RadioCommand) -> Result<(), RadioError> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => RadioError::QueueFull,
            TrySendError::Closed(_) => RadioError::Disconnected,
        })
    }
}

#[async_trait::async_trait]
impl RadioLink for ChannelRadio {
    fn poll_readings(&mut self) -> Vec<RadioReading> {
        let mut readings = Vec::new();
        loop {
            match self.readings.try_recv() {
                Ok(reading) => readings.push(reading),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        readings
    }

    async fn set_setpoint(&mut self, radio_id: u32, temperature: f64) -> Result<(), RadioError> {
        self.send(RadioCommand::SetSetpoint {
            radio_id,
            temperature,
        })
    }

    async fn switch(&mut self, house_code: u32, index: u8, on: bool) -> Result<(), RadioError> {
        self.send(RadioCommand::Switch {
            house_code,
            index,
            on,
        })
    }
}

impl RadioHandle {
    /// Report a decoded reading to the bridge
    pub fn report(&self, reading: RadioReading) -> Result<(), RadioError> {
        self.readings.try_send(reading).map_err(|e| match e {
            TrySendError::Full(_) => RadioError::QueueFull,
            TrySendError::Closed(_) => RadioError::Disconnected,
        })
    }

    /// Next command from the bridge; `None` once the bridge is gone
    pub async fn next_command(&mut self) -> Option<RadioCommand> {
        self.commands.recv().await
    }
}
