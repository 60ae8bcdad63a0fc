//! Bus protocol: topic layout and payload encodings

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
