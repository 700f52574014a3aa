//! # Network Protocol
//!
//! Binary messages exchanged between host and clients.
//!
//! ## Message Flow
//!
//! ```text
//! CLIENT                                   HOST
//!   |                                        |
//!   |<-- Start (scene, index[, state]) ------|  ReliableOrdered
//!   |--- ClientInput (tick, input) --------->|  Reliable
//!   |<-- ServerInput (tick, inputs, sum) ----|  Reliable, every tick
//!   |                                        |
//! ```
//!
//! ## Design Philosophy
//!
//! - Only inputs travel per tick; state is rebuilt locally
//! - The checksum rides along so every client can detect a desync
//! - Fixed little-endian layout, inputs copied as raw Pod bytes

mod messages;
mod serialization;

pub use messages::{
    ClientInputMessage, HostMessage, LateJoinState, MessageKind, ServerInputMessage,
    StartMessage, TickMessage,
};
pub use serialization::{ByteReader, ByteWriter};
