//! Per-valve state and its owner

pub mod record;
pub mod registry;

pub use record::DeviceRecord;
pub use registry::DeviceRegistry;
