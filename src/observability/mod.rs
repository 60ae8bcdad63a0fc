//! Observability: structured logging setup and span macros

pub mod logging;

pub use logging::{device_span, init_logging, session_span, LogFormat, LogSettings};
