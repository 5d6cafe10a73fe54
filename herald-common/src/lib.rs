//! Shared vocabulary for the herald push dispatcher: protocol names, gateway
//! modes and the logging setup every herald crate reports through.

pub mod logging;
pub mod protocol;

pub use protocol::{Mode, Protocol, UnknownProtocol};
pub use tracing;
