/// Connected peer records and the registry that owns them.
///
/// The registry owns every [`Peer`]; the sync core only keeps [`PeerId`]s and
/// re-resolves them on each use.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use containers::{BloomFilter, GraphState, ServiceFlag};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::{ConnectionState, Direction, PeerCount, PeerId};

#[derive(Debug, Clone)]
struct PeerState {
    connection_state: ConnectionState,
    graph_state: Option<GraphState>,
    services: ServiceFlag,
    protocol_version: u32,
    /// Unix time (seconds) advertised by the peer during the handshake.
    timestamp: Option<u64>,
    disable_relay_tx: bool,
    /// Minimum fee rate (atoms per kB) of transactions relayed to this peer.
    fee_filter: u64,
    filter: BloomFilter,
    unhealthy: bool,
}

/// One remote node.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    direction: Direction,
    state: RwLock<PeerState>,
}

impl Peer {
    pub fn new(id: impl Into<PeerId>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            direction,
            state: RwLock::new(PeerState {
                connection_state: ConnectionState::Connected,
                graph_state: None,
                services: ServiceFlag::FULL_NODE,
                protocol_version: 0,
                timestamp: None,
                disable_relay_tx: false,
                fee_filter: 0,
                filter: BloomFilter::new(),
                unhealthy: false,
            }),
        }
    }

    pub fn with_services(self, services: ServiceFlag) -> Self {
        self.state.write().services = services;
        self
    }

    pub fn with_protocol_version(self, version: u32) -> Self {
        self.state.write().protocol_version = version;
        self
    }

    pub fn with_graph_state(self, graph_state: GraphState) -> Self {
        self.state.write().graph_state = Some(graph_state);
        self
    }

    pub fn with_timestamp(self, timestamp: u64) -> Self {
        self.state.write().timestamp = Some(timestamp);
        self
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state.write().connection_state = state;
    }

    /// Latest known graph state; `None` means the peer is not a sync candidate.
    pub fn graph_state(&self) -> Option<GraphState> {
        self.state.read().graph_state.clone()
    }

    /// Store a fresh graph state. A peer that answers is healthy again.
    pub fn update_graph_state(&self, graph_state: GraphState) {
        let mut state = self.state.write();
        state.graph_state = Some(graph_state);
        state.unhealthy = false;
    }

    /// Connected and not marked unhealthy.
    pub fn is_active(&self) -> bool {
        let state = self.state.read();
        state.connection_state == ConnectionState::Connected && !state.unhealthy
    }

    /// Demote the peer until it reports a new graph state.
    pub fn mark_unhealthy(&self) {
        self.state.write().unhealthy = true;
    }

    pub fn is_unhealthy(&self) -> bool {
        self.state.read().unhealthy
    }

    pub fn services(&self) -> ServiceFlag {
        self.state.read().services
    }

    pub fn protocol_version(&self) -> u32 {
        self.state.read().protocol_version
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.state.read().timestamp
    }

    pub fn disable_relay_tx(&self) -> bool {
        self.state.read().disable_relay_tx
    }

    pub fn set_disable_relay_tx(&self, disable: bool) {
        self.state.write().disable_relay_tx = disable;
    }

    pub fn fee_filter(&self) -> u64 {
        self.state.read().fee_filter
    }

    pub fn set_fee_filter(&self, fee_per_kb: u64) {
        self.state.write().fee_filter = fee_per_kb;
    }

    pub fn filter_loaded(&self) -> bool {
        self.state.read().filter.is_loaded()
    }

    /// Run `f` with exclusive access to the peer's bloom filter.
    pub fn with_filter<R>(&self, f: impl FnOnce(&mut BloomFilter) -> R) -> R {
        f(&mut self.state.write().filter)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.id, self.direction)
    }
}

/// Enumerates connected peers.
pub trait PeerRegistry: Send + Sync + 'static {
    fn get(&self, id: &PeerId) -> Option<Arc<Peer>>;

    /// Connected peers, ordered by id.
    fn connected_peers(&self) -> Vec<Arc<Peer>>;

    /// Call `f` for every peer in `state`.
    fn for_peers(&self, state: ConnectionState, f: &mut dyn FnMut(&Arc<Peer>));

    /// Ask the transport to drop the connection.
    fn disconnect(&self, id: &PeerId);
}

/// Registry backed by a map of shared peer records.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
    disconnect_sink: Option<mpsc::UnboundedSender<PeerId>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward disconnect requests to the transport through `sink`.
    pub fn with_disconnect_sink(sink: mpsc::UnboundedSender<PeerId>) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            disconnect_sink: Some(sink),
        }
    }

    pub fn add_peer(&self, peer: Peer) -> Arc<Peer> {
        let peer = Arc::new(peer);
        self.peers.lock().insert(peer.id().clone(), peer.clone());
        info!(peer = %peer.id(), "Peer added to table");
        peer
    }

    pub fn remove_peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        let peer = self.peers.lock().remove(id)?;
        peer.set_connection_state(ConnectionState::Disconnected);
        info!(peer = %id, "Peer removed from table");
        Some(peer)
    }

    pub fn peer_count(&self) -> PeerCount {
        PeerCount::new(self.peers.lock().values().map(|p| p.connection_state()))
    }

    fn snapshot(&self, state: ConnectionState) -> Vec<Arc<Peer>> {
        let mut peers: Vec<Arc<Peer>> = self
            .peers
            .lock()
            .values()
            .filter(|p| p.connection_state() == state)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.id().cmp(b.id()));
        peers
    }
}

impl PeerRegistry for PeerTable {
    fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.lock().get(id).cloned()
    }

    fn connected_peers(&self) -> Vec<Arc<Peer>> {
        self.snapshot(ConnectionState::Connected)
    }

    fn for_peers(&self, state: ConnectionState, f: &mut dyn FnMut(&Arc<Peer>)) {
        // Callbacks run outside the table lock.
        for peer in self.snapshot(state) {
            f(&peer);
        }
    }

    fn disconnect(&self, id: &PeerId) {
        let Some(peer) = self.get(id) else {
            return;
        };
        peer.set_connection_state(ConnectionState::Disconnecting);
        debug!(peer = %id, "Disconnecting peer");
        if let Some(sink) = &self.disconnect_sink {
            if let Err(err) = sink.send(id.clone()) {
                debug!(peer = %err.0, "Disconnect sink closed");
            }
        }
    }
}
