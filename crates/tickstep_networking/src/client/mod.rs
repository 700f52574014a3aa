//! # Client
//!
//! Follows the host's confirmed ticks and predicts the local player ahead of
//! them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          CLIENT                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ServerInput ──▶ OrderedMessageBuffer ──▶ NetworkSimulation  │
//! │                                              │ due ticks     │
//! │                                              ▼               │
//! │  Rollback.confirmed ──pop──▶ Simulation ◀── official inputs  │
//! │          ▲                       │                           │
//! │          └────────push───────────┤                           │
//! │                                  ▼                           │
//! │             replay predictions, predict new ticks            │
//! │                                  │                           │
//! │                                  └──▶ ClientInput to host    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `Idle` ─ `connect` ─▶ `Connecting` ─▶ `AwaitingStart` ─ Start ─▶
//! `Loading` ─ `finish_loading` ─▶ `Running`. Losing the host, or
//! `shutdown`, ends in `Shutdown`.

mod network_simulation;

pub use network_simulation::NetworkSimulation;

use tickstep_core::{neutral_input, InputRecord, Scene, Simulation};

use crate::buffer::OrderedMessageBuffer;
use crate::config::SessionConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::{ClientInputMessage, HostMessage, ServerInputMessage, StartMessage};
use crate::rollback::Rollback;
use crate::transport::{DeliveryMode, PeerId, Transport, TransportEvent};

/// Client lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Not connected.
    #[default]
    Idle,
    /// Connection requested.
    Connecting,
    /// Connected, waiting for the host to start.
    AwaitingStart,
    /// Start received; the caller loads the scene.
    Loading,
    /// Following the host.
    Running,
    /// Disconnected for good.
    Shutdown,
}

impl ClientState {
    /// Lowercase name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingStart => "awaiting start",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Shutdown => "shut down",
        }
    }
}

/// Something the client observed during an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The host started a game; load the scene, then call
    /// [`Client::finish_loading`].
    LoadRequested {
        /// Scene to load.
        scene_index: i32,
    },
    /// A tick was resimulated with the host's inputs.
    Confirmed {
        /// Tick that was integrated.
        tick: i32,
        /// Local checksum of the state reached by the tick.
        checksum: i64,
    },
    /// The local checksum differs from the host's.
    Desync {
        /// Tick that diverged.
        tick: i32,
        /// Host checksum.
        expected: i64,
        /// Local checksum.
        actual: i64,
    },
    /// The host went away; the client shut down.
    Disconnected,
}

/// Snapshot of the client's timing state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClientDiagnostics {
    /// Ticks predicted past the confirmed state.
    pub predicted_tick_count: i32,
    /// Confirmed ticks waiting for playback.
    pub jitter_buffer_len: usize,
    /// Buffered playback time ahead of the cursor, seconds.
    pub current_delay: f64,
    /// Delay the observed jitter calls for, seconds.
    pub target_delay: f64,
    /// `current_delay - target_delay`.
    pub error: f64,
    /// Playback speed.
    pub timescale: f64,
    /// Next tick to confirm.
    pub confirmed_tick: i32,
    /// Tick of the predicted state.
    pub live_tick: i32,
}

/// Lockstep client with prediction and rollback.
pub struct Client<I: InputRecord, T: Transport> {
    config: SessionConfig,
    transport: T,
    scene: Box<dyn Scene<I>>,
    state: ClientState,
    host: Option<PeerId>,
    start: Option<StartMessage>,
    simulation: Option<Simulation<I>>,
    rollback: Option<Rollback<I>>,
    network: NetworkSimulation<I>,
    /// Host ticks not yet contiguous with the jitter buffer.
    staged: OrderedMessageBuffer<ServerInputMessage<I>>,
    /// Inputs of the last integrated tick, indexed by player.
    current_inputs: Vec<I>,
    /// Local clock in seconds, advanced by `update`.
    clock: f64,
}

impl<I: InputRecord, T: Transport> Client<I, T> {
    /// Creates an idle client that will run `scene`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] if the configuration is invalid.
    pub fn new(config: SessionConfig, transport: T, scene: impl Scene<I> + 'static) -> NetResult<Self> {
        config.validate()?;
        Ok(Self {
            network: NetworkSimulation::new(&config),
            config,
            transport,
            scene: Box::new(scene),
            state: ClientState::Idle,
            host: None,
            start: None,
            simulation: None,
            rollback: None,
            staged: OrderedMessageBuffer::new(),
            current_inputs: Vec::new(),
            clock: 0.0,
        })
    }

    /// Connects to a host.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] unless idle, or the transport's
    /// error.
    pub fn connect(&mut self, address: &str, port: u16) -> NetResult<()> {
        if self.state != ClientState::Idle {
            return Err(NetError::InvalidState {
                operation: "connect",
                state: self.state.name(),
            });
        }
        self.transport.connect(address, port)?;
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// Builds the simulation for the requested scene and starts following
    /// the host.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] unless loading, or an error from
    /// building the scene or installing the late-join state.
    pub fn finish_loading(&mut self) -> NetResult<()> {
        let Some(start) = self.start.take().filter(|_| self.state == ClientState::Loading) else {
            return Err(NetError::InvalidState {
                operation: "finish loading",
                state: self.state.name(),
            });
        };

        let invalid = || NetError::InvalidStart {
            player_count: start.player_count,
            local_player_index: start.local_player_index,
        };
        let local_player_index = usize::try_from(start.local_player_index).map_err(|_| invalid())?;
        let player_count = usize::try_from(start.player_count).map_err(|_| invalid())?;
        if local_player_index >= player_count {
            return Err(invalid());
        }
        #[allow(clippy::cast_possible_truncation)]
        let delta_time = self.config.delta_time() as f32;
        let mut simulation = Simulation::load_scene(
            self.scene.as_ref(),
            start.scene_index,
            self.config.arena_blocks,
            delta_time,
            local_player_index,
        )?;

        if let Some(late_join) = &start.late_join {
            simulation.set_state(&late_join.state)?;
            simulation.snapshot_mut().set_tick(late_join.tick);
            self.network
                .set_confirmed_time(f64::from(late_join.tick) * self.config.delta_time());
            tracing::debug!(
                "Installed {} bytes of tick {}",
                late_join.state.len(),
                late_join.tick
            );
        }

        let rollback = Rollback::new(simulation.snapshot());
        let stale = self.staged.discard_older_than(simulation.tick());
        if stale > 0 {
            tracing::debug!("Dropped {} ticks older than the loaded state", stale);
        }

        self.current_inputs = vec![neutral_input(); player_count];
        tracing::info!(
            "Running scene {} as player {} of {} from tick {}",
            start.scene_index,
            local_player_index,
            player_count,
            simulation.tick()
        );
        self.simulation = Some(simulation);
        self.rollback = Some(rollback);
        self.state = ClientState::Running;
        Ok(())
    }

    /// Processes transport events and, once running, confirms due ticks and
    /// predicts `local_input` ahead of them.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::SkippedTick`], [`NetError::Core`] or a decode
    /// error. All are fatal: the caller must end the session.
    pub fn update(&mut self, delta_time: f64, local_input: I) -> NetResult<Vec<ClientEvent>> {
        let mut events = Vec::new();
        if matches!(self.state, ClientState::Idle | ClientState::Shutdown) {
            return Ok(events);
        }
        self.clock += delta_time;

        for event in self.transport.poll() {
            match event {
                TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer),
                TransportEvent::PeerDisconnected(peer) => {
                    if self.host == Some(peer) {
                        tracing::info!("Host disconnected");
                        self.shutdown();
                        events.push(ClientEvent::Disconnected);
                        return Ok(events);
                    }
                }
                TransportEvent::Receive { data, .. } => self.on_receive(&data, &mut events)?,
            }
        }

        if self.state == ClientState::Running {
            self.advance(delta_time, local_input, &mut events)?;
        }
        Ok(events)
    }

    /// Closes the transport. Further updates do nothing.
    pub fn shutdown(&mut self) {
        if self.state != ClientState::Shutdown {
            self.transport.shutdown();
            self.state = ClientState::Shutdown;
        }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Predicted simulation, once running.
    #[inline]
    #[must_use]
    pub const fn simulation(&self) -> Option<&Simulation<I>> {
        self.simulation.as_ref()
    }

    /// Mutable simulation, for installing a presenter.
    #[inline]
    pub fn simulation_mut(&mut self) -> Option<&mut Simulation<I>> {
        self.simulation.as_mut()
    }

    /// Last confirmed state, once running.
    #[must_use]
    pub fn confirmed(&self) -> Option<&tickstep_core::Snapshot> {
        self.rollback.as_ref().map(Rollback::confirmed)
    }

    /// Timing diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> ClientDiagnostics {
        ClientDiagnostics {
            predicted_tick_count: self.network.predicted_tick_count(),
            jitter_buffer_len: self.network.buffered(),
            current_delay: self.network.current_delay(),
            target_delay: self.network.target_delay(),
            error: self.network.error(),
            timescale: self.network.timescale(),
            confirmed_tick: self.rollback.as_ref().map_or(0, |r| r.confirmed().tick()),
            live_tick: self.simulation.as_ref().map_or(0, Simulation::tick),
        }
    }

    /// Underlying transport.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn on_peer_connected(&mut self, peer: PeerId) {
        if self.state == ClientState::Connecting {
            self.host = Some(peer);
            self.state = ClientState::AwaitingStart;
            tracing::info!("Connected to host as {}", peer);
        }
    }

    fn on_receive(&mut self, data: &[u8], events: &mut Vec<ClientEvent>) -> NetResult<()> {
        match HostMessage::<I>::from_bytes(data)? {
            HostMessage::Start(start) => {
                if self.state == ClientState::AwaitingStart {
                    tracing::info!(
                        "Start received: scene {}, player {} of {}",
                        start.scene_index,
                        start.local_player_index,
                        start.player_count
                    );
                    events.push(ClientEvent::LoadRequested {
                        scene_index: start.scene_index,
                    });
                    self.start = Some(start);
                    self.state = ClientState::Loading;
                } else {
                    tracing::warn!("Ignoring start while {}", self.state.name());
                }
            }
            HostMessage::Input(message) => self.staged.insert(message),
        }
        Ok(())
    }

    fn advance(&mut self, delta_time: f64, local_input: I, events: &mut Vec<ClientEvent>) -> NetResult<()> {
        let (Some(simulation), Some(rollback)) = (self.simulation.as_mut(), self.rollback.as_mut()) else {
            return Ok(());
        };

        let mut next_confirmed = rollback.confirmed().tick();
        let mut next_to_enter = self.network.next_tick_to_enter(next_confirmed);
        self.staged.discard_older_than(next_to_enter);
        while let Some(message) = self.staged.try_dequeue(next_to_enter) {
            self.network.insert(message, self.clock);
            next_to_enter += 1;
        }
        self.network.integrate(delta_time);

        let mut confirmed_any = false;
        while let Some(message) = self.network.try_pop(next_confirmed, self.clock)? {
            if !confirmed_any {
                rollback.pop_confirmed(simulation.snapshot_mut())?;
                simulation.rebuild()?;
                confirmed_any = true;
            }

            let tick = simulation.tick();
            self.current_inputs.clone_from(&message.inputs);
            let checksum = simulation.integrate(&self.current_inputs, message.new_players_joining)?;
            if checksum != message.checksum {
                tracing::error!(
                    "Desync at tick {}: host {:#018x}, local {:#018x}",
                    tick,
                    message.checksum,
                    checksum
                );
                events.push(ClientEvent::Desync {
                    tick,
                    expected: message.checksum,
                    actual: checksum,
                });
            }
            events.push(ClientEvent::Confirmed { tick, checksum });
            rollback.consume_predicted_input(tick);
            next_confirmed = simulation.tick();
        }

        if !confirmed_any {
            return Ok(());
        }

        rollback.push_confirmed(simulation.snapshot())?;
        simulation.rebuild()?;

        let local = simulation.local_player_index();
        if self.current_inputs.len() <= local {
            self.current_inputs.resize(local + 1, neutral_input());
        }

        let target_forward_tick = simulation.tick() + self.network.predicted_tick_count();
        while simulation.tick() < rollback.forward_tick() {
            self.current_inputs[local] = rollback.predicted_input(simulation.tick());
            simulation.integrate(&self.current_inputs, 0)?;
        }

        while simulation.tick() <= target_forward_tick {
            let tick = simulation.tick();
            rollback.record_predicted_input(tick, local_input);
            self.current_inputs[local] = local_input;
            simulation.integrate(&self.current_inputs, 0)?;

            let message = ClientInputMessage {
                tick,
                input: local_input,
            };
            self.transport
                .send_to_all(&message.to_bytes(), DeliveryMode::Reliable)?;
        }

        rollback.set_forward_tick(simulation.tick());
        Ok(())
    }
}

impl<I: InputRecord, T: Transport> std::fmt::Debug for Client<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("host", &self.host)
            .field("diagnostics", &self.diagnostics())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LateJoinState;
    use crate::transport::{LocalBroker, LocalTransport};
    use tickstep_core::{Component, CoreResult, EntityWorld, Prefab, PrefabTable, Snapshot, TickContext};

    const DT: f64 = 1.0 / 60.0;

    /// Folds every player's input into one word.
    struct Fold;
    impl Component<u8> for Fold {
        fn state_size(&self) -> usize {
            4
        }
        fn tick_update(&self, ctx: &mut TickContext<'_, u8>) -> CoreResult<()> {
            let mut value: u32 = ctx.read()?;
            for player in 0..ctx.player_count() {
                value = value.wrapping_mul(33) ^ u32::from(ctx.input(player));
            }
            ctx.write(&value)
        }
    }

    struct Table;
    impl Scene<u8> for Table {
        fn prefabs(&self) -> PrefabTable<u8> {
            PrefabTable::new()
        }
        fn populate(&self, _: i32, world: &mut EntityWorld<u8>, snapshot: &mut Snapshot) -> CoreResult<()> {
            world.register_persistent(snapshot, Prefab::new("fold").with(Fold))?;
            Ok(())
        }
    }

    /// A client connected to a bare transport standing in for the host.
    fn connected() -> (Client<u8, LocalTransport>, LocalTransport) {
        let broker = LocalBroker::new();
        let mut host = broker.transport();
        host.listen(9000).unwrap();
        let mut client = Client::new(SessionConfig::default(), broker.transport(), Table).unwrap();
        client.connect("local", 9000).unwrap();
        client.update(0.0, 0).unwrap();
        host.poll();
        (client, host)
    }

    fn send(host: &mut LocalTransport, message: HostMessage<u8>, mode: DeliveryMode) {
        host.send(PeerId(0), &message.to_bytes().unwrap(), mode).unwrap();
    }

    fn start(late_join: Option<LateJoinState>) -> HostMessage<u8> {
        HostMessage::Start(StartMessage {
            scene_index: 0,
            player_count: 2,
            local_player_index: 1,
            late_join,
        })
    }

    fn server_input(tick: i32, checksum: i64) -> HostMessage<u8> {
        HostMessage::Input(ServerInputMessage {
            tick,
            checksum,
            inputs: vec![1, 2],
            new_players_joining: 0,
            requested_input_timing_delta: 0.0,
        })
    }

    fn checksum_after(ticks: i32) -> i64 {
        let mut simulation = Simulation::load_scene(&Table, 0, 1024, 1.0 / 60.0, 0).unwrap();
        let mut checksum = 0;
        for _ in 0..ticks {
            checksum = simulation.integrate(&[1, 2], 0).unwrap();
        }
        checksum
    }

    #[test]
    fn test_lifecycle_to_running() {
        let (mut client, mut host) = connected();
        assert_eq!(client.state(), ClientState::AwaitingStart);

        send(&mut host, start(None), DeliveryMode::ReliableOrdered);
        let events = client.update(0.0, 0).unwrap();
        assert_eq!(events, vec![ClientEvent::LoadRequested { scene_index: 0 }]);
        assert_eq!(client.state(), ClientState::Loading);

        client.finish_loading().unwrap();
        assert_eq!(client.state(), ClientState::Running);
        assert!(client.finish_loading().is_err());
    }

    #[test]
    fn test_confirms_and_predicts() {
        let (mut client, mut host) = connected();
        send(&mut host, start(None), DeliveryMode::ReliableOrdered);
        client.update(0.0, 0).unwrap();
        client.finish_loading().unwrap();

        send(&mut host, server_input(0, checksum_after(1)), DeliveryMode::Reliable);
        let events = client.update(DT, 7).unwrap();
        assert_eq!(
            events,
            vec![ClientEvent::Confirmed {
                tick: 0,
                checksum: checksum_after(1)
            }]
        );
        assert_eq!(client.confirmed().unwrap().tick(), 1);
        // One tick predicted past the confirmed state and sent to the host.
        assert_eq!(client.simulation().unwrap().tick(), 2);

        let sent: Vec<_> = host
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Receive { data, .. } => Some(ClientInputMessage::<u8>::from_bytes(&data).unwrap()),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![ClientInputMessage { tick: 1, input: 7 }]);
    }

    #[test]
    fn test_checksum_mismatch_reports_desync() {
        let (mut client, mut host) = connected();
        send(&mut host, start(None), DeliveryMode::ReliableOrdered);
        client.update(0.0, 0).unwrap();
        client.finish_loading().unwrap();

        send(&mut host, server_input(0, 42), DeliveryMode::Reliable);
        let events = client.update(DT, 0).unwrap();
        assert!(events.contains(&ClientEvent::Desync {
            tick: 0,
            expected: 42,
            actual: checksum_after(1)
        }));
        assert_eq!(client.state(), ClientState::Running);
    }

    #[test]
    fn test_inputs_staged_before_loading() {
        let (mut client, mut host) = connected();
        send(&mut host, start(None), DeliveryMode::ReliableOrdered);
        send(&mut host, server_input(0, checksum_after(1)), DeliveryMode::Reliable);
        send(&mut host, server_input(1, checksum_after(2)), DeliveryMode::Reliable);
        client.update(0.0, 0).unwrap();
        client.finish_loading().unwrap();

        let events = client.update(2.0 * DT, 0).unwrap();
        let confirmed: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, ClientEvent::Confirmed { .. }))
            .collect();
        assert_eq!(confirmed.len(), 2);
    }

    #[test]
    fn test_late_join_starts_from_state() {
        let mut simulation = Simulation::load_scene(&Table, 0, 1024, 1.0 / 60.0, 0).unwrap();
        for _ in 0..5 {
            simulation.integrate(&[1, 2], 0).unwrap();
        }
        let state = LateJoinState {
            tick: 5,
            state: simulation.snapshot().to_bytes(true),
        };

        let (mut client, mut host) = connected();
        send(&mut host, start(Some(state)), DeliveryMode::ReliableOrdered);
        client.update(0.0, 0).unwrap();
        client.finish_loading().unwrap();
        assert_eq!(client.simulation().unwrap().tick(), 5);
        assert_eq!(client.confirmed().unwrap().checksum(), simulation.snapshot().checksum());

        send(&mut host, server_input(5, checksum_after(6)), DeliveryMode::Reliable);
        let events = client.update(DT, 0).unwrap();
        assert_eq!(
            events,
            vec![ClientEvent::Confirmed {
                tick: 5,
                checksum: checksum_after(6)
            }]
        );
    }

    #[test]
    fn test_rejects_start_outside_player_range() {
        let (mut client, mut host) = connected();
        let start = HostMessage::Start(StartMessage {
            scene_index: 0,
            player_count: 2,
            local_player_index: 2,
            late_join: None,
        });
        send(&mut host, start, DeliveryMode::ReliableOrdered);
        client.update(0.0, 0).unwrap();
        assert!(matches!(
            client.finish_loading(),
            Err(NetError::InvalidStart {
                player_count: 2,
                local_player_index: 2
            })
        ));
    }

    #[test]
    fn test_host_loss_shuts_down() {
        let (mut client, mut host) = connected();
        host.shutdown();
        let events = client.update(DT, 0).unwrap();
        assert_eq!(events, vec![ClientEvent::Disconnected]);
        assert_eq!(client.state(), ClientState::Shutdown);
        assert!(client.update(DT, 0).unwrap().is_empty());
    }

    #[test]
    fn test_gap_holds_later_ticks() {
        let (mut client, mut host) = connected();
        send(&mut host, start(None), DeliveryMode::ReliableOrdered);
        client.update(0.0, 0).unwrap();
        client.finish_loading().unwrap();

        // Tick 0 never arrives; 1 is staged but never reaches playback.
        send(&mut host, server_input(1, 0), DeliveryMode::Reliable);
        assert!(client.update(DT, 0).unwrap().is_empty());
        assert_eq!(client.diagnostics().jitter_buffer_len, 0);
    }
}
