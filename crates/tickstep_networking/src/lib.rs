//! # TICKSTEP Networking - Lockstep Protocol
//!
//! Host/client tick integration over a reliable transport.
//!
//! ## Architecture
//!
//! - **Protocol**: Three fixed-layout messages, inputs copied as raw Pod bytes
//! - **Transport**: A reliable datagram contract plus an in-process implementation
//! - **Host**: Collects one input per player per tick and broadcasts them with a checksum
//! - **Client**: Plays confirmed ticks from a jitter buffer and predicts ahead with rollback
//!
//! ## Determinism Model
//!
//! ```text
//! HOST                                   CLIENT
//!   |                                       |
//!   |<-- ClientInput(tick, input) ----------|  predicted locally
//!   | integrate(tick) -> checksum           |
//!   |--- ServerInput(tick, inputs, sum) --->|
//!   |                                       | rollback, integrate(tick)
//!   |                                       | compare checksums
//! ```
//!
//! Only inputs travel. Every participant runs the same simulation on the same
//! bytes and must reach the same checksum.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tickstep_networking::{Client, Host, LocalBroker, SessionConfig};
//!
//! let broker = LocalBroker::new();
//! let mut host = Host::new(SessionConfig::default(), broker.transport(), MyScene)?;
//! host.listen(7777)?;
//!
//! let mut client = Client::new(SessionConfig::default(), broker.transport(), MyScene)?;
//! client.connect("local", 7777)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rollback;
pub mod server;
pub mod transport;

pub use buffer::{ClientInputBuffer, JitterBuffer, JitterTimescale, OrderedMessageBuffer, RollingStandardDeviation};
pub use client::{Client, ClientDiagnostics, ClientEvent, ClientState, NetworkSimulation};
pub use config::{JitterConfig, PredictionConfig, SessionConfig};
pub use error::{NetError, NetResult};
pub use protocol::{ClientInputMessage, HostMessage, LateJoinState, ServerInputMessage, StartMessage};
pub use rollback::Rollback;
pub use server::{FixedStep, Host, HostEvent, HostState};
pub use transport::{
    DeliveryMode, LocalBroker, LocalTransport, PeerId, SimulatedLatency, Transport, TransportEvent,
    TransportStats,
};

/// Ticks per second when nothing else is configured.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Most players in one session, host included.
pub const MAX_PLAYERS: usize = 16;

/// Player index of the host.
pub const HOST_PLAYER_INDEX: usize = 0;
