mod filter_tests;
mod get_data_tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chain::{BestState, Chain, TxMemPool};
use containers::{
    Block, GraphState, Hash, Inventory, MerkleBlock, Transaction, TxDesc, TxInput, TxOutput,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::peers::{Peer, PeerTable};
use crate::sync::{PeerSync, SyncConfig, SyncNetwork};
use crate::types::{Direction, PeerId};

/// Graph state whose progress grows with `height`.
pub fn graph_state(height: u64) -> GraphState {
    GraphState::new(
        [Hash::digest(&height.to_le_bytes())],
        height,
        height,
        height,
        height,
    )
}

pub fn test_tx(seed: u8, pk_script: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_out: containers::OutPoint::new(Hash([seed; 32]), 0),
            sign_script: vec![],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            amount: containers::Amount(1_000),
            pk_script,
        }],
        lock_time: 0,
    }
}

#[derive(Debug, Default)]
pub struct ChainState {
    pub best: BestState,
    pub current: bool,
    pub orphans_total: usize,
    pub orphan_parents: Vec<Hash>,
    pub refreshes: usize,
    pub blocks: HashMap<Hash, Block>,
}

#[derive(Debug, Default)]
pub struct MockChain {
    pub state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(local: GraphState) -> Self {
        let chain = Self::default();
        chain.set_best(local);
        chain
    }

    pub fn set_best(&self, graph_state: GraphState) {
        self.state.lock().best = BestState {
            hash: Hash::digest(&graph_state.main_order.to_le_bytes()),
            graph_state,
        };
    }

    pub fn set_orphans(&self, total: usize, parents: Vec<Hash>) {
        let mut state = self.state.lock();
        state.orphans_total = total;
        state.orphan_parents = parents;
    }

    pub fn refreshes(&self) -> usize {
        self.state.lock().refreshes
    }

    pub fn add_block(&self, block: Block) {
        self.state.lock().blocks.insert(block.hash(), block);
    }
}

impl Chain for MockChain {
    fn best_snapshot(&self) -> BestState {
        self.state.lock().best.clone()
    }

    fn is_current(&self) -> bool {
        self.state.lock().current
    }

    fn orphans_total(&self) -> usize {
        self.state.lock().orphans_total
    }

    fn refresh_orphans(&self) {
        self.state.lock().refreshes += 1;
    }

    fn recent_orphans_parents(&self) -> Vec<Hash> {
        self.state.lock().orphan_parents.clone()
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.state.lock().blocks.get(hash).cloned()
    }
}

#[derive(Debug, Default)]
pub struct MockMempool {
    pub descs: Mutex<Vec<TxDesc>>,
}

impl MockMempool {
    pub fn add(&self, desc: TxDesc) {
        self.descs.lock().push(desc);
    }
}

impl TxMemPool for MockMempool {
    fn tx_descs(&self) -> Vec<TxDesc> {
        self.descs.lock().clone()
    }

    fn fetch_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.descs
            .lock()
            .iter()
            .find(|desc| desc.tx.tx_hash() == *hash)
            .map(|desc| desc.tx.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Blocks(PeerId, Vec<Hash>),
    BlockDatas(PeerId, Vec<Hash>),
    Txs(PeerId, Vec<Hash>),
    GraphState(PeerId),
    SyncDag(PeerId),
    Qnr(PeerId, String),
    Inventory(PeerId, Inventory),
    NotFound(PeerId, Inventory),
    Transaction(PeerId, Hash),
    Block(PeerId, Hash),
    MerkleBlock(PeerId, MerkleBlock),
}

impl Call {
    pub fn peer(&self) -> &PeerId {
        match self {
            Call::Blocks(peer, _)
            | Call::BlockDatas(peer, _)
            | Call::Txs(peer, _)
            | Call::GraphState(peer)
            | Call::SyncDag(peer)
            | Call::Qnr(peer, _)
            | Call::Inventory(peer, _)
            | Call::NotFound(peer, _)
            | Call::Transaction(peer, _)
            | Call::Block(peer, _)
            | Call::MerkleBlock(peer, _) => peer,
        }
    }
}

/// Records every request. Peers listed in `failing` get an error back.
#[derive(Debug, Default)]
pub struct MockNetwork {
    pub calls: Mutex<Vec<Call>>,
    pub failing: Mutex<Vec<PeerId>>,
    pub graph_states: Mutex<HashMap<PeerId, GraphState>>,
}

impl MockNetwork {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, peer: &str) -> Vec<Call> {
        let peer = PeerId::from(peer);
        self.calls()
            .into_iter()
            .filter(|call| *call.peer() == peer)
            .collect()
    }

    pub fn fail_peer(&self, peer: &str) {
        self.failing.lock().push(PeerId::from(peer));
    }

    fn record(&self, call: Call) -> Result<()> {
        let peer = call.peer().clone();
        self.calls.lock().push(call);
        if self.failing.lock().contains(&peer) {
            return Err(anyhow!("peer {peer} is unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncNetwork for MockNetwork {
    async fn request_blocks(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()> {
        self.record(Call::Blocks(peer, blocks))
    }

    async fn request_block_datas(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()> {
        self.record(Call::BlockDatas(peer, blocks))
    }

    async fn request_txs(&self, peer: PeerId, txs: Vec<Hash>) -> Result<()> {
        self.record(Call::Txs(peer, txs))
    }

    async fn request_graph_state(&self, peer: PeerId) -> Result<GraphState> {
        self.record(Call::GraphState(peer.clone()))?;
        self.graph_states
            .lock()
            .get(&peer)
            .cloned()
            .ok_or_else(|| anyhow!("no graph state for {peer}"))
    }

    async fn sync_dag_blocks(&self, peer: PeerId, _local: GraphState) -> Result<()> {
        self.record(Call::SyncDag(peer))
    }

    async fn sync_qnr(&self, peer: PeerId, qnr: String) -> Result<()> {
        self.record(Call::Qnr(peer, qnr))
    }

    async fn send_inventory(&self, peer: PeerId, inventory: Inventory) -> Result<()> {
        self.record(Call::Inventory(peer, inventory))
    }

    async fn send_not_found(&self, peer: PeerId, inventory: Inventory) -> Result<()> {
        self.record(Call::NotFound(peer, inventory))
    }

    async fn send_transaction(&self, peer: PeerId, tx: Transaction) -> Result<()> {
        self.record(Call::Transaction(peer, tx.tx_hash()))
    }

    async fn send_block(&self, peer: PeerId, block: Block) -> Result<()> {
        self.record(Call::Block(peer, block.hash()))
    }

    async fn send_merkle_block(&self, peer: PeerId, block: MerkleBlock) -> Result<()> {
        self.record(Call::MerkleBlock(peer, block))
    }
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub mempool: Arc<MockMempool>,
    pub peers: Arc<PeerTable>,
    pub network: Arc<MockNetwork>,
    pub sync: Arc<PeerSync<MockNetwork>>,
    pub disconnects: mpsc::UnboundedReceiver<PeerId>,
}

impl Harness {
    pub fn new(local: GraphState) -> Self {
        Self::with_config(local, SyncConfig::default())
    }

    pub fn with_config(local: GraphState, config: SyncConfig) -> Self {
        let chain = Arc::new(MockChain::new(local));
        let mempool = Arc::new(MockMempool::default());
        let (disconnect_tx, disconnects) = mpsc::unbounded_channel();
        let peers = Arc::new(PeerTable::with_disconnect_sink(disconnect_tx));
        let network = Arc::new(MockNetwork::default());
        let sync = Arc::new(PeerSync::new(
            config,
            chain.clone(),
            mempool.clone(),
            peers.clone(),
            network.clone(),
        ));

        Self {
            chain,
            mempool,
            peers,
            network,
            sync,
            disconnects,
        }
    }

    pub fn add_peer(&self, id: &str, graph_state: Option<GraphState>) -> Arc<Peer> {
        let peer = Peer::new(id, Direction::Outbound);
        let peer = match graph_state {
            Some(graph_state) => peer.with_graph_state(graph_state),
            None => peer,
        };
        self.peers.add_peer(peer)
    }

    /// Connect a peer and let the loop handle it.
    pub async fn connect(&self, id: &str, graph_state: Option<GraphState>) -> Arc<Peer> {
        let peer = self.add_peer(id, graph_state);
        self.sync.on_peer_connected(peer.id().clone());
        self.settle().await;
        peer
    }

    /// Wait until every message queued so far is handled and background
    /// requests had a chance to run.
    pub async fn settle(&self) {
        if let Ok(handle) = self.sync.pause().await {
            handle.resume();
        }
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    pub fn sync_peer(&self) -> Option<String> {
        self.sync.sync_peer_id().map(|id| id.to_string())
    }
}

/// Poll `condition` until it holds, failing the test after a while.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
