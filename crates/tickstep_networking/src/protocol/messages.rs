//! # Wire Messages
//!
//! The three messages of the lockstep protocol.
//!
//! ```text
//! Start        host → client   0 | scene | players | index | has_state [| tick | len | state]
//! ClientInput  client → host   1 | tick | input
//! ServerInput  host → client   1 | tick | checksum | count:u8 | inputs | joins | timing_delta
//! ```
//!
//! Client and server inputs share kind 1; the direction tells them apart.

use tickstep_core::InputRecord;

use super::serialization::{ByteReader, ByteWriter};
use crate::error::{NetError, NetResult};

/// Leading byte of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Host → Client: load a scene and start simulating.
    Start = 0,
    /// Either direction: per-tick inputs.
    Input = 1,
}

impl TryFrom<u8> for MessageKind {
    type Error = NetError;

    fn try_from(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(Self::Start),
            1 => Ok(Self::Input),
            other => Err(NetError::UnknownMessageKind(other)),
        }
    }
}

/// A message that belongs to one tick.
pub trait TickMessage {
    /// Tick the message belongs to.
    fn tick(&self) -> i32;
}

/// Snapshot shipped to a client that joins a running game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LateJoinState {
    /// Tick the snapshot was taken at.
    pub tick: i32,
    /// Trimmed arena image.
    pub state: Vec<u8>,
}

/// Host → Client: load a scene and start simulating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartMessage {
    /// Scene to load.
    pub scene_index: i32,
    /// Players in the session, host included.
    pub player_count: i32,
    /// Player index assigned to the receiving client.
    pub local_player_index: i32,
    /// Present when the game is already running.
    pub late_join: Option<LateJoinState>,
}

impl StartMessage {
    /// Writes the message, kind byte included.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::PayloadTooLarge`] if the state does not fit an
    /// `i32` length.
    pub fn encode(&self, writer: &mut ByteWriter) -> NetResult<()> {
        writer.write_u8(MessageKind::Start as u8);
        writer.write_i32(self.scene_index);
        writer.write_i32(self.player_count);
        writer.write_i32(self.local_player_index);
        writer.write_bool(self.late_join.is_some());
        if let Some(late_join) = &self.late_join {
            let len = i32::try_from(late_join.state.len())
                .map_err(|_| NetError::PayloadTooLarge(late_join.state.len()))?;
            writer.write_i32(late_join.tick);
            writer.write_i32(len);
            writer.write_bytes(&late_join.state);
        }
        Ok(())
    }

    /// Reads the fields after the kind byte.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] for short or inconsistent payloads.
    pub fn decode(reader: &mut ByteReader<'_>) -> NetResult<Self> {
        let scene_index = reader.read_i32()?;
        let player_count = reader.read_i32()?;
        let local_player_index = reader.read_i32()?;
        let late_join = if reader.read_bool()? {
            let tick = reader.read_i32()?;
            let len = reader.read_i32()?;
            let len = usize::try_from(len).map_err(|_| NetError::Malformed {
                expected: 0,
                remaining: reader.remaining(),
            })?;
            Some(LateJoinState {
                tick,
                state: reader.read_bytes(len)?.to_vec(),
            })
        } else {
            None
        };
        Ok(Self {
            scene_index,
            player_count,
            local_player_index,
            late_join,
        })
    }
}

/// Client → Host: the local input for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClientInputMessage<I: InputRecord> {
    /// Tick the input is meant for.
    pub tick: i32,
    /// The input.
    pub input: I,
}

impl<I: InputRecord> ClientInputMessage<I> {
    /// Encodes the message, kind byte included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(5 + std::mem::size_of::<I>());
        writer.write_u8(MessageKind::Input as u8);
        writer.write_i32(self.tick);
        writer.write_pod(&self.input);
        writer.into_bytes()
    }

    /// Decodes a complete message.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnknownMessageKind`] if the payload is not an
    /// input, [`NetError::Malformed`] if it is short.
    pub fn from_bytes(bytes: &[u8]) -> NetResult<Self> {
        let mut reader = ByteReader::new(bytes);
        match MessageKind::try_from(reader.read_u8()?)? {
            MessageKind::Input => Ok(Self {
                tick: reader.read_i32()?,
                input: reader.read_pod()?,
            }),
            MessageKind::Start => Err(NetError::UnknownMessageKind(MessageKind::Start as u8)),
        }
    }
}

impl<I: InputRecord> TickMessage for ClientInputMessage<I> {
    fn tick(&self) -> i32 {
        self.tick
    }
}

/// Host → Client: the official inputs of one tick and the resulting checksum.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerInputMessage<I: InputRecord> {
    /// Tick the inputs were integrated at.
    pub tick: i32,
    /// Host checksum of the state reached by this tick.
    pub checksum: i64,
    /// One input per player, host first.
    pub inputs: Vec<I>,
    /// Join events integrated with this tick.
    pub new_players_joining: i32,
    /// How far (seconds) the receiving client should shift its prediction.
    pub requested_input_timing_delta: f32,
}

impl<I: InputRecord> ServerInputMessage<I> {
    /// Writes the message, kind byte included.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TooManyPlayers`] if the input count does not fit a
    /// byte.
    pub fn encode(&self, writer: &mut ByteWriter) -> NetResult<()> {
        let count =
            u8::try_from(self.inputs.len()).map_err(|_| NetError::TooManyPlayers(self.inputs.len()))?;
        writer.write_u8(MessageKind::Input as u8);
        writer.write_i32(self.tick);
        writer.write_i64(self.checksum);
        writer.write_u8(count);
        for input in &self.inputs {
            writer.write_pod(input);
        }
        writer.write_i32(self.new_players_joining);
        writer.write_f32(self.requested_input_timing_delta);
        Ok(())
    }

    /// Reads the fields after the kind byte.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if the payload is short.
    pub fn decode(reader: &mut ByteReader<'_>) -> NetResult<Self> {
        let tick = reader.read_i32()?;
        let checksum = reader.read_i64()?;
        let count = usize::from(reader.read_u8()?);
        let mut inputs = Vec::with_capacity(count);
        for _ in 0..count {
            inputs.push(reader.read_pod()?);
        }
        Ok(Self {
            tick,
            checksum,
            inputs,
            new_players_joining: reader.read_i32()?,
            requested_input_timing_delta: reader.read_f32()?,
        })
    }
}

impl<I: InputRecord> TickMessage for ServerInputMessage<I> {
    fn tick(&self) -> i32 {
        self.tick
    }
}

/// Any message a client can receive from the host.
#[derive(Clone, Debug, PartialEq)]
pub enum HostMessage<I: InputRecord> {
    /// Scene start, possibly with a late-join snapshot.
    Start(StartMessage),
    /// Official inputs of one tick.
    Input(ServerInputMessage<I>),
}

impl<I: InputRecord> HostMessage<I> {
    /// Encodes the message, kind byte included.
    ///
    /// # Errors
    ///
    /// See [`StartMessage::encode`] and [`ServerInputMessage::encode`].
    pub fn to_bytes(&self) -> NetResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        match self {
            Self::Start(start) => start.encode(&mut writer)?,
            Self::Input(input) => input.encode(&mut writer)?,
        }
        Ok(writer.into_bytes())
    }

    /// Decodes a complete message.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnknownMessageKind`] or [`NetError::Malformed`].
    pub fn from_bytes(bytes: &[u8]) -> NetResult<Self> {
        let mut reader = ByteReader::new(bytes);
        match MessageKind::try_from(reader.read_u8()?)? {
            MessageKind::Start => Ok(Self::Start(StartMessage::decode(&mut reader)?)),
            MessageKind::Input => Ok(Self::Input(ServerInputMessage::decode(&mut reader)?)),
        }
    }
}
