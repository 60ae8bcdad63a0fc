//! Inbound message routing
//!
//! Maps bus topics onto typed [`RoutedMessage`]s for the bridge to act on.

pub mod router;

pub use router::{BigLightCommand, MessageRouter, Route, RouteError, RoutedMessage};
