//! TRV bridge
//!
//! Bridges battery radiator valves (TRVs) on a local radio link, a home
//! automation MQTT bus and a cloud thermostat service that owns the boiler.
//!
//! # Overview
//!
//! Each valve reports its ambient temperature over the radio. Users set a
//! target for each valve over MQTT. The bridge decides per valve whether it
//! is calling for heat, publishes the aggregate boiler demand, and steers
//! the cloud service's own target temperature a margin above or below the
//! valve's reading so the boiler fires exactly when some valve needs heat.
//!
//! - [`protocol`]: topic layout and payload formats
//! - [`reconcile`]: the pure per-valve state machine
//! - [`transport`]: the MQTT session and its reconnecting event loop
//! - [`cloud`]: the cloud HTTP client and its poll schedule
//! - [`bridge`]: glue that turns decisions into publishes and cloud writes
//!
//! # Quick Start
//!
//! ```rust
//! use trv_bridge::device::DeviceRecord;
//! use trv_bridge::reconcile::Reconciler;
//!
//! let reconciler = Reconciler::new(1.0);
//! let mut lounge = DeviceRecord::new("lounge", 8220, 4411, 0.0);
//!
//! reconciler.on_ambient_reading(&mut lounge, 18.0);
//! let nudge = reconciler.on_local_target_set(&mut lounge, 21.0);
//!
//! assert!(Reconciler::calling_for_heat(&lounge));
//! assert_eq!(nudge.map(|n| n.value), Some(22.0));
//! ```

pub mod bridge;
pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod radio;
pub mod reconcile;
pub mod routing;
pub mod testing;
pub mod transport;

pub use bridge::TrvBridge;
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
