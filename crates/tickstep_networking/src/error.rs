//! # Networking Error Types
//!
//! All errors that can occur while running a host or client session.

use thiserror::Error;
use tickstep_core::CoreError;

use crate::transport::PeerId;

/// Errors that can occur in the networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// The simulation failed; the session cannot continue.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The jitter buffer does not hold the tick that must be confirmed next.
    #[error("skipped tick: requested {requested}, oldest buffered {oldest}")]
    SkippedTick {
        /// Tick the client needs next.
        requested: i32,
        /// Oldest tick in the buffer.
        oldest: i32,
    },

    /// A payload ended before a field could be read.
    #[error("malformed payload: needed {expected} bytes, {remaining} left")]
    Malformed {
        /// Bytes the field needs.
        expected: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A payload is too large for its length field.
    #[error("payload of {0} bytes is too large")]
    PayloadTooLarge(usize),

    /// The leading kind byte names no known message.
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u8),

    /// A send targeted a peer the transport does not know.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Another endpoint already listens on this port.
    #[error("port {0} already in use")]
    PortInUse(u16),

    /// Nothing listens on this port.
    #[error("no listener on port {0}")]
    NoListener(u16),

    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// State the role was in.
        state: &'static str,
    },

    /// A start message names a player outside the session.
    #[error("invalid start: player {local_player_index} of {player_count}")]
    InvalidStart {
        /// Players in the session.
        player_count: i32,
        /// Index assigned to this client.
        local_player_index: i32,
    },

    /// The session is full.
    #[error("too many players: {0}")]
    TooManyPlayers(usize),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
