//! # Local Transport
//!
//! In-process transport for tests and single-machine sessions.
//!
//! ## Design
//!
//! ```text
//!            LocalBroker (Arc<Mutex<..>>)
//!      ┌──────── listeners: port → endpoint ────────┐
//!      │         inboxes:   endpoint → Sender        │
//!      │         clock:     manual, seconds         │
//!      └────────────────────────────────────────────┘
//!          ▲ send                          │ try_recv in poll()
//!   LocalTransport (host)           LocalTransport (client)
//! ```
//!
//! - Every packet carries the broker time it becomes deliverable
//! - The clock only moves through [`LocalBroker::advance`], so latency runs
//!   are reproducible
//! - The ordered channel holds packets that arrive ahead of a gap

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{DeliveryMode, PeerId, Transport, TransportEvent, TransportStats};
use crate::error::{NetError, NetResult};

/// Uniform random one-way delay applied to every send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulatedLatency {
    /// Lower bound in milliseconds.
    pub min_ms: u32,
    /// Upper bound in milliseconds.
    pub max_ms: u32,
}

impl SimulatedLatency {
    /// Draws one delay in seconds.
    fn sample(self, rng: &mut StdRng) -> f64 {
        let ms = if self.max_ms > self.min_ms {
            rng.gen_range(self.min_ms..=self.max_ms)
        } else {
            self.min_ms
        };
        f64::from(ms) / 1000.0
    }
}

/// Broker-assigned endpoint identifier.
type EndpointId = u32;

/// What travels through an endpoint's inbox.
enum Frame {
    Connected {
        peer: PeerId,
        remote: EndpointId,
        remote_peer: PeerId,
    },
    Disconnected {
        peer: PeerId,
    },
    Packet(Packet),
}

struct Packet {
    /// Sender, as the receiver knows it.
    peer: PeerId,
    mode: DeliveryMode,
    sequence: u32,
    data: Vec<u8>,
    sent_at: f64,
    deliver_at: f64,
}

struct Endpoint {
    inbox: Sender<Frame>,
    next_peer: u32,
}

#[derive(Default)]
struct BrokerState {
    now: f64,
    next_endpoint: EndpointId,
    listeners: HashMap<u16, EndpointId>,
    endpoints: HashMap<EndpointId, Endpoint>,
}

impl BrokerState {
    fn assign_peer(&mut self, endpoint: EndpointId) -> NetResult<PeerId> {
        let entry = self
            .endpoints
            .get_mut(&endpoint)
            .ok_or(NetError::InvalidState {
                operation: "connect",
                state: "shut down",
            })?;
        let peer = PeerId(entry.next_peer);
        entry.next_peer += 1;
        Ok(peer)
    }
}

/// Registry that connects [`LocalTransport`]s inside one process.
///
/// Cloning is cheap; all clones share the same registry and clock.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    /// Creates an empty broker at time 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current broker time in seconds.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.state.lock().now
    }

    /// Moves the clock forward.
    pub fn advance(&self, seconds: f64) {
        self.state.lock().now += seconds;
    }

    /// Creates a transport without latency.
    #[must_use]
    pub fn transport(&self) -> LocalTransport {
        self.transport_with_latency(None)
    }

    /// Creates a transport that delays each of its sends.
    #[must_use]
    pub fn transport_with_latency(&self, latency: Option<SimulatedLatency>) -> LocalTransport {
        let (sender, inbox) = unbounded();
        let endpoint = {
            let mut state = self.state.lock();
            let endpoint = state.next_endpoint;
            state.next_endpoint += 1;
            state.endpoints.insert(
                endpoint,
                Endpoint {
                    inbox: sender,
                    next_peer: 0,
                },
            );
            endpoint
        };

        LocalTransport {
            broker: self.clone(),
            endpoint,
            inbox,
            listening: None,
            peers: BTreeMap::new(),
            in_flight: Vec::new(),
            pending: Vec::new(),
            latency,
            rng: StdRng::seed_from_u64(u64::from(endpoint)),
            stats: TransportStats::default(),
        }
    }

    fn deliver(&self, endpoint: EndpointId, frame: Frame) {
        let state = self.state.lock();
        if let Some(target) = state.endpoints.get(&endpoint) {
            // A closed inbox means the endpoint is being dropped.
            let _ = target.inbox.send(frame);
        }
    }
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LocalBroker")
            .field("now", &state.now)
            .field("listeners", &state.listeners.len())
            .field("endpoints", &state.endpoints.len())
            .finish()
    }
}

/// Send and receive bookkeeping for one direction of one channel.
#[derive(Default)]
struct Channel {
    next_send: u32,
    next_receive: u32,
    held: BTreeMap<u32, Packet>,
}

struct PeerLink {
    remote: EndpointId,
    /// How the remote endpoint knows us.
    remote_peer: PeerId,
    reliable: Channel,
    ordered: Channel,
}

impl PeerLink {
    fn new(remote: EndpointId, remote_peer: PeerId) -> Self {
        Self {
            remote,
            remote_peer,
            reliable: Channel::default(),
            ordered: Channel::default(),
        }
    }

    fn channel(&mut self, mode: DeliveryMode) -> &mut Channel {
        match mode {
            DeliveryMode::Reliable => &mut self.reliable,
            DeliveryMode::ReliableOrdered => &mut self.ordered,
        }
    }
}

/// One participant's end of the in-process transport.
pub struct LocalTransport {
    broker: LocalBroker,
    endpoint: EndpointId,
    inbox: Receiver<Frame>,
    listening: Option<u16>,
    peers: BTreeMap<PeerId, PeerLink>,
    /// Packets received but not yet due.
    in_flight: Vec<Packet>,
    /// Events raised outside `poll`.
    pending: Vec<TransportEvent>,
    latency: Option<SimulatedLatency>,
    rng: StdRng,
    stats: TransportStats,
}

impl LocalTransport {
    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Connected peers.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// The broker this transport is registered with.
    #[must_use]
    pub const fn broker(&self) -> &LocalBroker {
        &self.broker
    }

    fn on_frame(&mut self, frame: Frame, events: &mut Vec<TransportEvent>) {
        match frame {
            Frame::Connected {
                peer,
                remote,
                remote_peer,
            } => {
                tracing::info!("Accepted local connection: {}", peer);
                self.peers.insert(peer, PeerLink::new(remote, remote_peer));
                events.push(TransportEvent::PeerConnected(peer));
            }
            Frame::Disconnected { peer } => {
                if self.peers.remove(&peer).is_some() {
                    tracing::info!("Local connection closed: {}", peer);
                    self.in_flight.retain(|packet| packet.peer != peer);
                    events.push(TransportEvent::PeerDisconnected(peer));
                }
            }
            Frame::Packet(packet) => self.in_flight.push(packet),
        }
    }

    fn deliver_due(&mut self, now: f64, events: &mut Vec<TransportEvent>) {
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|packet| packet.deliver_at <= now);
        self.in_flight = waiting;
        due.sort_by(|a, b| a.deliver_at.total_cmp(&b.deliver_at));

        for packet in due {
            let Some(link) = self.peers.get_mut(&packet.peer) else {
                continue;
            };
            match packet.mode {
                DeliveryMode::Reliable => {
                    link.reliable.next_receive = link.reliable.next_receive.max(packet.sequence + 1);
                    Self::receive(&mut self.stats, packet, now, events);
                }
                DeliveryMode::ReliableOrdered => {
                    let channel = &mut link.ordered;
                    if packet.sequence != channel.next_receive {
                        self.stats.held_out_of_order += 1;
                    }
                    channel.held.insert(packet.sequence, packet);
                    while let Some(next) = channel.held.remove(&channel.next_receive) {
                        channel.next_receive += 1;
                        Self::receive(&mut self.stats, next, now, events);
                    }
                }
            }
        }
    }

    fn receive(stats: &mut TransportStats, packet: Packet, now: f64, events: &mut Vec<TransportEvent>) {
        stats.packets_received += 1;
        stats.bytes_received += packet.data.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let round_trip = ((now - packet.sent_at) * 2.0) as f32;
        events.push(TransportEvent::Receive {
            peer: packet.peer,
            round_trip,
            data: packet.data,
        });
    }
}

impl Transport for LocalTransport {
    fn listen(&mut self, port: u16) -> NetResult<()> {
        let mut state = self.broker.state.lock();
        if state.listeners.contains_key(&port) {
            return Err(NetError::PortInUse(port));
        }
        state.listeners.insert(port, self.endpoint);
        drop(state);

        self.listening = Some(port);
        tracing::info!("Listening on local port {}", port);
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> NetResult<()> {
        let (host, host_peer, client_peer) = {
            let mut state = self.broker.state.lock();
            let host = *state.listeners.get(&port).ok_or(NetError::NoListener(port))?;
            let client_peer = state.assign_peer(host)?;
            let host_peer = state.assign_peer(self.endpoint)?;
            (host, host_peer, client_peer)
        };

        self.broker.deliver(
            host,
            Frame::Connected {
                peer: client_peer,
                remote: self.endpoint,
                remote_peer: host_peer,
            },
        );
        self.peers.insert(host_peer, PeerLink::new(host, client_peer));
        self.pending.push(TransportEvent::PeerConnected(host_peer));
        tracing::info!("Connected to {}:{} as {}", address, port, client_peer);
        Ok(())
    }

    fn shutdown(&mut self) {
        for link in std::mem::take(&mut self.peers).into_values() {
            self.broker.deliver(
                link.remote,
                Frame::Disconnected {
                    peer: link.remote_peer,
                },
            );
        }
        if let Some(port) = self.listening.take() {
            self.broker.state.lock().listeners.remove(&port);
        }
        self.in_flight.clear();
        self.pending.clear();
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = std::mem::take(&mut self.pending);
        while let Ok(frame) = self.inbox.try_recv() {
            self.on_frame(frame, &mut events);
        }
        let now = self.broker.now();
        self.deliver_due(now, &mut events);
        events
    }

    fn send(&mut self, peer: PeerId, data: &[u8], mode: DeliveryMode) -> NetResult<()> {
        let delay = self.latency.map_or(0.0, |latency| latency.sample(&mut self.rng));
        let now = self.broker.now();
        let link = self.peers.get_mut(&peer).ok_or(NetError::UnknownPeer(peer))?;
        let channel = link.channel(mode);
        let sequence = channel.next_send;
        channel.next_send += 1;

        let (remote, remote_peer) = (link.remote, link.remote_peer);
        self.broker.deliver(
            remote,
            Frame::Packet(Packet {
                peer: remote_peer,
                mode,
                sequence,
                data: data.to_vec(),
                sent_at: now,
                deliver_at: now + delay,
            }),
        );
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn send_to_all(&mut self, data: &[u8], mode: DeliveryMode) -> NetResult<()> {
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.send(peer, data, mode)?;
        }
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.shutdown();
        self.broker.state.lock().endpoints.remove(&self.endpoint);
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("endpoint", &self.endpoint)
            .field("listening", &self.listening)
            .field("peers", &self.peers.len())
            .field("in_flight", &self.in_flight.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
