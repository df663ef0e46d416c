//! # etherspy-protocol
//!
//! EtherSpy wire formats.
//!
//! This crate defines the live WebSocket message formats and the codecs for
//! the two inbound telemetry encodings: engine output lines and broker
//! payloads.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
