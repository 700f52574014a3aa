//! # Host
//!
//! The authoritative participant: player 0, owner of the official inputs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          HOST                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  Transport ──▶ ClientInputBuffer (one per client)        │
//! │                      │ one input per tick                │
//! │                      ▼                                   │
//! │  FixedStep ──▶ Simulation::integrate ──▶ checksum        │
//! │                      │                                   │
//! │                      ▼                                   │
//! │  ServerInput{tick, checksum, inputs, joins, timing} ──▶  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `WaitingForConnections` ─ `start_game` ─▶ `Running`; either ─ `shutdown`
//! ─▶ `Shutdown`. Clients that connect while running get the current
//! snapshot in their `Start` message.

mod tick;

pub use tick::{FixedStep, StepStats};

use tickstep_core::{neutral_input, InputRecord, Scene, Simulation};

use crate::buffer::ClientInputBuffer;
use crate::config::SessionConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::{ByteWriter, ClientInputMessage, LateJoinState, ServerInputMessage, StartMessage};
use crate::transport::{DeliveryMode, PeerId, Transport, TransportEvent};
use crate::{HOST_PLAYER_INDEX, MAX_PLAYERS};

/// Host lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostState {
    /// Accepting players; no simulation yet.
    WaitingForConnections,
    /// Integrating ticks.
    Running,
    /// Transport closed.
    Shutdown,
}

impl HostState {
    /// Lowercase name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WaitingForConnections => "waiting for connections",
            Self::Running => "running",
            Self::Shutdown => "shut down",
        }
    }
}

/// Something the host did during an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// A client connected and was given a player slot.
    PlayerJoined {
        /// Transport peer.
        peer: PeerId,
        /// Player index assigned to the client.
        player_index: usize,
    },
    /// A client disconnected; its slot is frozen.
    PlayerLeft {
        /// Transport peer.
        peer: PeerId,
    },
    /// A tick was integrated and broadcast.
    Ticked {
        /// Tick that was integrated.
        tick: i32,
        /// Checksum of the state reached by the tick.
        checksum: i64,
    },
}

/// Per-client bookkeeping. Player index is slot index + 1.
struct ClientSlot<I: InputRecord> {
    peer: PeerId,
    buffer: ClientInputBuffer<I>,
    connected: bool,
    /// Whether any input was consumed yet.
    delivering: bool,
}

/// Authoritative lockstep host.
pub struct Host<I: InputRecord, T: Transport> {
    config: SessionConfig,
    transport: T,
    scene: Box<dyn Scene<I>>,
    state: HostState,
    listening: bool,
    simulation: Option<Simulation<I>>,
    clients: Vec<ClientSlot<I>>,
    /// Latest input of every player, host first.
    inputs: Vec<I>,
    /// Join events to integrate with the next tick.
    join_events: i32,
    step: FixedStep,
    writer: ByteWriter,
    /// Outgoing per-tick message, refreshed in place.
    broadcast: ServerInputMessage<I>,
}

impl<I: InputRecord, T: Transport> Host<I, T> {
    /// Creates a host that will run `scene` over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] if the configuration is invalid.
    pub fn new(config: SessionConfig, transport: T, scene: impl Scene<I> + 'static) -> NetResult<Self> {
        config.validate()?;
        Ok(Self {
            step: FixedStep::new(config.delta_time()),
            config,
            transport,
            scene: Box::new(scene),
            state: HostState::WaitingForConnections,
            listening: false,
            simulation: None,
            clients: Vec::new(),
            inputs: Vec::new(),
            join_events: 0,
            writer: ByteWriter::new(),
            broadcast: ServerInputMessage {
                tick: 0,
                checksum: 0,
                inputs: Vec::with_capacity(MAX_PLAYERS),
                new_players_joining: 0,
                requested_input_timing_delta: 0.0,
            },
        })
    }

    /// Opens the port and registers the host as player 0.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] unless waiting for connections and
    /// not yet listening, or the transport's error.
    pub fn listen(&mut self, port: u16) -> NetResult<()> {
        if self.state != HostState::WaitingForConnections || self.listening {
            return Err(NetError::InvalidState {
                operation: "listen",
                state: self.state.name(),
            });
        }
        self.transport.listen(port)?;
        self.listening = true;
        self.inputs.push(neutral_input());
        self.join_events = 1;
        tracing::info!("Host listening on port {}", port);
        Ok(())
    }

    /// Loads scene 0, tells every client to start and begins ticking.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] unless listening and waiting, or an
    /// error from loading the scene or sending.
    pub fn start_game(&mut self) -> NetResult<()> {
        if self.state != HostState::WaitingForConnections || !self.listening {
            return Err(NetError::InvalidState {
                operation: "start the game",
                state: self.state.name(),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let delta_time = self.config.delta_time() as f32;
        let simulation =
            Simulation::load_scene(self.scene.as_ref(), 0, self.config.arena_blocks, delta_time, HOST_PLAYER_INDEX)?;
        self.simulation = Some(simulation);

        let player_count = self.player_count_i32()?;
        for (slot, client) in self.clients.iter().enumerate() {
            if !client.connected {
                continue;
            }
            let start = StartMessage {
                scene_index: 0,
                player_count,
                local_player_index: player_index_i32(slot)?,
                late_join: None,
            };
            self.writer.reset();
            start.encode(&mut self.writer)?;
            self.transport
                .send(client.peer, self.writer.as_slice(), DeliveryMode::ReliableOrdered)?;
        }

        self.join_events = player_count;
        self.step.reset();
        self.state = HostState::Running;
        tracing::info!("Game started with {} players", player_count);
        Ok(())
    }

    /// Processes transport events, then integrates every tick that is due.
    ///
    /// `local_input` is the host player's input for those ticks.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Core`] if the simulation fails; the session must
    /// end. Send failures other than a vanished peer are returned as well.
    pub fn update(&mut self, delta_time: f64, local_input: I) -> NetResult<Vec<HostEvent>> {
        let mut events = Vec::new();
        if self.state == HostState::Shutdown {
            return Ok(events);
        }

        for event in self.transport.poll() {
            match event {
                TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer, &mut events)?,
                TransportEvent::PeerDisconnected(peer) => self.on_peer_disconnected(peer, &mut events),
                TransportEvent::Receive { peer, data, .. } => self.on_receive(peer, &data),
            }
        }

        if self.state == HostState::Running {
            self.step.accumulate(delta_time);
            while self.step.try_step() {
                self.integrate_tick(local_input, &mut events)?;
            }
        }
        Ok(events)
    }

    /// Closes the transport. Further updates do nothing.
    pub fn shutdown(&mut self) {
        if self.state != HostState::Shutdown {
            self.transport.shutdown();
            self.state = HostState::Shutdown;
            tracing::info!("Host shut down");
        }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> HostState {
        self.state
    }

    /// Next tick to be integrated; 0 before the game starts.
    #[must_use]
    pub fn tick(&self) -> i32 {
        self.simulation.as_ref().map_or(0, Simulation::tick)
    }

    /// Players in the session, host and frozen slots included.
    #[inline]
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.inputs.len()
    }

    /// Clients still connected.
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.clients.iter().filter(|client| client.connected).count()
    }

    /// Running simulation, once the game started.
    #[inline]
    #[must_use]
    pub const fn simulation(&self) -> Option<&Simulation<I>> {
        self.simulation.as_ref()
    }

    /// Smoothed input timing error of a client player, in seconds.
    #[must_use]
    pub fn timing_error(&self, player_index: usize) -> Option<f64> {
        let slot = player_index.checked_sub(1)?;
        self.clients.get(slot).map(|client| client.buffer.timing_error())
    }

    /// Tick pacing statistics.
    #[inline]
    #[must_use]
    pub const fn step_stats(&self) -> &StepStats {
        self.step.stats()
    }

    /// Session configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Underlying transport.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn on_peer_connected(&mut self, peer: PeerId, events: &mut Vec<HostEvent>) -> NetResult<()> {
        if self.inputs.len() >= MAX_PLAYERS {
            tracing::warn!("Session full, ignoring {}", peer);
            return Ok(());
        }

        let slot = self.clients.len();
        let player_index = slot + 1;
        self.clients.push(ClientSlot {
            peer,
            buffer: ClientInputBuffer::new(self.tick(), &self.config.prediction),
            connected: true,
            delivering: false,
        });
        self.inputs.push(neutral_input());
        self.join_events += 1;
        events.push(HostEvent::PlayerJoined { peer, player_index });
        tracing::info!("{} joined as player {}", peer, player_index);

        if let Some(simulation) = &self.simulation {
            let start = StartMessage {
                scene_index: 0,
                player_count: self.player_count_i32()?,
                local_player_index: player_index_i32(slot)?,
                late_join: Some(LateJoinState {
                    tick: simulation.tick(),
                    state: simulation.snapshot().to_bytes(true),
                }),
            };
            self.writer.reset();
            start.encode(&mut self.writer)?;
            self.transport
                .send(peer, self.writer.as_slice(), DeliveryMode::ReliableOrdered)?;
            tracing::debug!(
                "Sent {} bytes of tick {} to late joiner {}",
                self.writer.len(),
                simulation.tick(),
                peer
            );
        }
        Ok(())
    }

    fn on_peer_disconnected(&mut self, peer: PeerId, events: &mut Vec<HostEvent>) {
        if let Some(client) = self.clients.iter_mut().find(|client| client.peer == peer && client.connected) {
            client.connected = false;
            events.push(HostEvent::PlayerLeft { peer });
            tracing::info!("{} left, input slot frozen", peer);
        }
    }

    fn on_receive(&mut self, peer: PeerId, data: &[u8]) {
        let host_tick = self.tick();
        let time_until_next = self.step.time_until_next();
        let delta_time = self.step.step();
        let Some(client) = self.clients.iter_mut().find(|client| client.peer == peer && client.connected) else {
            tracing::warn!("Dropped payload from unknown {}", peer);
            return;
        };
        match ClientInputMessage::<I>::from_bytes(data) {
            Ok(message) => client.buffer.insert(message, host_tick, time_until_next, delta_time),
            Err(e) => tracing::warn!("Rejected payload from {}: {}", peer, e),
        }
    }

    fn integrate_tick(&mut self, local_input: I, events: &mut Vec<HostEvent>) -> NetResult<()> {
        let Some(simulation) = self.simulation.as_mut() else {
            return Ok(());
        };
        let tick = simulation.tick();

        self.inputs[HOST_PLAYER_INDEX] = local_input;
        for (slot, client) in self.clients.iter_mut().enumerate() {
            if !client.connected {
                continue;
            }
            if let Some(message) = client.buffer.try_pop() {
                if !client.delivering {
                    tracing::debug!(
                        "First input from {} (tick {}) used at tick {}",
                        client.peer,
                        message.tick,
                        tick
                    );
                }
                self.inputs[slot + 1] = message.input;
                client.delivering = true;
            } else if client.delivering {
                tracing::warn!("No input from {} for tick {}, reusing previous", client.peer, tick);
            }
        }

        let checksum = simulation.integrate(&self.inputs, self.join_events)?;

        let message = &mut self.broadcast;
        message.tick = tick;
        message.checksum = checksum;
        message.inputs.clone_from(&self.inputs);
        message.new_players_joining = self.join_events;
        for client in &mut self.clients {
            if !client.connected {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                message.requested_input_timing_delta = client.buffer.timing_error() as f32;
            }
            self.writer.reset();
            message.encode(&mut self.writer)?;
            match self
                .transport
                .send(client.peer, self.writer.as_slice(), DeliveryMode::Reliable)
            {
                Ok(()) => {}
                Err(NetError::UnknownPeer(peer)) => {
                    client.connected = false;
                    tracing::warn!("{} vanished, input slot frozen", peer);
                }
                Err(e) => return Err(e),
            }
        }

        self.join_events = 0;
        events.push(HostEvent::Ticked { tick, checksum });
        Ok(())
    }

    fn player_count_i32(&self) -> NetResult<i32> {
        i32::try_from(self.inputs.len()).map_err(|_| NetError::TooManyPlayers(self.inputs.len()))
    }
}

fn player_index_i32(slot: usize) -> NetResult<i32> {
    i32::try_from(slot + 1).map_err(|_| NetError::TooManyPlayers(slot + 1))
}

impl<I: InputRecord, T: Transport> std::fmt::Debug for Host<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("state", &self.state)
            .field("tick", &self.tick())
            .field("players", &self.inputs.len())
            .field("join_events", &self.join_events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HostMessage;
    use crate::transport::{LocalBroker, LocalTransport};
    use tickstep_core::{Component, CoreResult, EntityWorld, Prefab, PrefabTable, Snapshot, TickContext};

    const DT: f64 = 1.0 / 60.0;

    /// Counts ticks and joins.
    struct Tally;
    impl Component<u8> for Tally {
        fn state_size(&self) -> usize {
            8
        }
        fn tick_update(&self, ctx: &mut TickContext<'_, u8>) -> CoreResult<()> {
            let [ticks, joins]: [u32; 2] = ctx.read()?;
            ctx.write(&[ticks + 1, joins])
        }
        fn player_joined(&self, ctx: &mut TickContext<'_, u8>) -> CoreResult<()> {
            let [ticks, joins]: [u32; 2] = ctx.read()?;
            ctx.write(&[ticks, joins + 1])
        }
    }

    struct Lobby;
    impl Scene<u8> for Lobby {
        fn prefabs(&self) -> PrefabTable<u8> {
            PrefabTable::new()
        }
        fn populate(&self, _: i32, world: &mut EntityWorld<u8>, snapshot: &mut Snapshot) -> CoreResult<()> {
            world.register_persistent(snapshot, Prefab::new("tally").with(Tally))?;
            Ok(())
        }
    }

    fn host(broker: &LocalBroker) -> Host<u8, LocalTransport> {
        let mut host = Host::new(SessionConfig::default(), broker.transport(), Lobby).unwrap();
        host.listen(7000).unwrap();
        host
    }

    fn host_messages(transport: &mut impl Transport) -> Vec<HostMessage<u8>> {
        transport
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Receive { data, .. } => Some(HostMessage::from_bytes(&data).unwrap()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_requires_listen() {
        let broker = LocalBroker::new();
        let mut host = Host::new(SessionConfig::default(), broker.transport(), Lobby).unwrap();
        assert!(matches!(host.start_game(), Err(NetError::InvalidState { .. })));
    }

    #[test]
    fn test_start_and_first_tick() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        let mut client = broker.transport();
        client.connect("local", 7000).unwrap();

        let events = host.update(0.0, 0).unwrap();
        assert_eq!(
            events,
            vec![HostEvent::PlayerJoined {
                peer: PeerId(0),
                player_index: 1
            }]
        );
        host.start_game().unwrap();
        assert_eq!(host.state(), HostState::Running);

        let events = host.update(DT, 5).unwrap();
        assert!(matches!(events.as_slice(), [HostEvent::Ticked { tick: 0, .. }]));

        let messages = host_messages(&mut client);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            HostMessage::Start(start) => {
                assert_eq!(start.player_count, 2);
                assert_eq!(start.local_player_index, 1);
                assert!(start.late_join.is_none());
            }
            other => panic!("expected start, got {other:?}"),
        }
        match &messages[1] {
            HostMessage::Input(input) => {
                assert_eq!(input.tick, 0);
                assert_eq!(input.inputs, vec![5, 0]);
                assert_eq!(input.new_players_joining, 2);
            }
            other => panic!("expected input, got {other:?}"),
        }
    }

    #[test]
    fn test_client_input_is_integrated() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        let mut client = broker.transport();
        client.connect("local", 7000).unwrap();
        host.update(0.0, 0).unwrap();
        host.start_game().unwrap();
        host.update(DT, 0).unwrap();

        let input = ClientInputMessage { tick: 1, input: 9u8 };
        client.send(PeerId(0), &input.to_bytes(), DeliveryMode::Reliable).unwrap();
        host.update(DT, 0).unwrap();

        let inputs: Vec<_> = host_messages(&mut client)
            .into_iter()
            .filter_map(|message| match message {
                HostMessage::Input(input) => Some((input.tick, input.inputs, input.new_players_joining)),
                HostMessage::Start(_) => None,
            })
            .collect();
        assert_eq!(inputs, vec![(0, vec![0, 0], 2), (1, vec![0, 9], 0)]);
    }

    #[test]
    fn test_broadcast_reuses_input_storage() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        let mut client = broker.transport();
        client.connect("local", 7000).unwrap();
        host.update(0.0, 0).unwrap();
        host.start_game().unwrap();
        host.update(DT, 1).unwrap();

        let storage = host.broadcast.inputs.as_ptr();
        for frame in 0..20 {
            host.update(DT, frame).unwrap();
        }
        assert_eq!(host.tick(), 21);
        assert_eq!(host.broadcast.inputs.as_ptr(), storage);
        assert_eq!(host.broadcast.inputs, vec![19, 0]);
        assert_eq!(host.broadcast.tick, 20);
    }

    #[test]
    fn test_late_joiner_receives_state() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        host.start_game().unwrap();
        for _ in 0..3 {
            host.update(DT, 0).unwrap();
        }
        assert_eq!(host.tick(), 3);

        let mut late = broker.transport();
        late.connect("local", 7000).unwrap();
        host.update(0.0, 0).unwrap();

        let messages = host_messages(&mut late);
        let HostMessage::Start(start) = &messages[0] else {
            panic!("expected start");
        };
        let state = start.late_join.as_ref().unwrap();
        assert_eq!(state.tick, 3);
        assert_eq!(start.local_player_index, 1);
        assert_eq!(state.state, host.simulation().unwrap().snapshot().to_bytes(true));
    }

    #[test]
    fn test_disconnect_freezes_slot() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        let mut client = broker.transport();
        client.connect("local", 7000).unwrap();
        host.update(0.0, 0).unwrap();
        host.start_game().unwrap();

        client.shutdown();
        let events = host.update(DT, 0).unwrap();
        assert!(events.contains(&HostEvent::PlayerLeft { peer: PeerId(0) }));
        assert_eq!(host.connected_clients(), 0);
        assert_eq!(host.player_count(), 2);
        assert_eq!(host.tick(), 1);
    }

    #[test]
    fn test_shutdown_stops_ticking() {
        let broker = LocalBroker::new();
        let mut host = host(&broker);
        host.start_game().unwrap();
        host.shutdown();
        assert!(host.update(1.0, 0).unwrap().is_empty());
        assert_eq!(host.tick(), 0);
    }
}
