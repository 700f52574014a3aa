//! # Tick Buffers
//!
//! Staging areas between the transport and the simulation.
//!
//! | Buffer | Side | Purpose |
//! |--------|------|---------|
//! | [`ClientInputBuffer`] | host | one client's inputs, one per host tick |
//! | [`JitterBuffer`] | client | confirmed ticks released by playback time |
//! | [`OrderedMessageBuffer`] | both | tick-sorted staging |

mod client_input;
mod jitter;
mod ordered;
mod rolling;
mod timescale;

pub use client_input::ClientInputBuffer;
pub use jitter::JitterBuffer;
pub use ordered::OrderedMessageBuffer;
pub use rolling::RollingStandardDeviation;
pub use timescale::JitterTimescale;
