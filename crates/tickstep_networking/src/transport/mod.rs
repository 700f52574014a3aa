//! # Transport Layer
//!
//! The reliable messaging contract the lockstep roles are written against.
//!
//! ## Design
//!
//! - Both delivery modes are reliable; ordering is the only difference
//! - Events are drained once per frame with [`Transport::poll`]
//! - Peers are small integers assigned by the transport

mod local;

pub use local::{LocalBroker, LocalTransport, SimulatedLatency};

use crate::error::NetResult;

/// Transport-assigned identifier of a remote participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer {}", self.0)
    }
}

/// How a payload must be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Delivered exactly once, in any order.
    Reliable,
    /// Delivered exactly once, in send order.
    ReliableOrdered,
}

/// Something that happened on the transport since the last poll.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A peer connected.
    PeerConnected(PeerId),
    /// A peer disconnected or shut down.
    PeerDisconnected(PeerId),
    /// A payload arrived.
    Receive {
        /// Sender.
        peer: PeerId,
        /// Round-trip estimate in seconds.
        round_trip: f32,
        /// The payload.
        data: Vec<u8>,
    },
}

/// Reliable datagram transport.
pub trait Transport {
    /// Accepts connections on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    fn listen(&mut self, port: u16) -> NetResult<()>;

    /// Connects to a listening endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing listens at the address.
    fn connect(&mut self, address: &str, port: u16) -> NetResult<()>;

    /// Notifies every peer and drops all connections.
    fn shutdown(&mut self);

    /// Drains everything that happened since the last call.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Sends a payload to one peer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetError::UnknownPeer`] if the peer is not connected.
    fn send(&mut self, peer: PeerId, data: &[u8], mode: DeliveryMode) -> NetResult<()>;

    /// Sends a payload to every connected peer.
    ///
    /// # Errors
    ///
    /// Returns the first send error.
    fn send_to_all(&mut self, data: &[u8], mode: DeliveryMode) -> NetResult<()>;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Ordered packets that arrived ahead of a gap and had to wait.
    pub held_out_of_order: u64,
}
