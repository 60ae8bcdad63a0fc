//! Temperature reconciliation between local valves and the cloud thermostat
//!
//! Everything here is synchronous and free of I/O: the reconciler mutates
//! [`DeviceRecord`](crate::device::DeviceRecord)s and returns the cloud writes
//! it wants made. The bridge performs them.

pub mod aggregate;
pub mod reconciler;

pub use aggregate::{aggregate, BoilerDemand};
pub use reconciler::{Demand, Nudge, PollOutcome, ReadingUpdate, Reconciler};
