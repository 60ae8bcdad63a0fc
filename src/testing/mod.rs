//! Testing utilities and mock implementations
//!
//! Mocks for the MQTT session, the cloud service and the radio link, so the
//! bridge can be exercised without a broker or hardware.

pub mod mocks;

pub use mocks::*;
