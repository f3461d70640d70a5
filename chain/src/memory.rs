use std::collections::{BTreeSet, HashMap};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use containers::{Block, GraphState, Hash, Transaction, TxDesc};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{BestState, Chain, ChainConfig, OrphanPool, TxMemPool};

/// Outcome of [`MemoryChain::process_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Connected to the DAG; `resolved` orphans were connected with it.
    Connected { resolved: usize },
    /// At least one parent is unknown; parked in the orphan pool.
    Orphan,
    Duplicate,
}

#[derive(Debug)]
struct DagState {
    blocks: HashMap<Hash, Block>,
    layers: HashMap<Hash, u64>,
    tips: BTreeSet<Hash>,
    order: Vec<Hash>,
    orphans: OrphanPool,
    mempool: HashMap<Hash, TxDesc>,
}

/// In-memory DAG with an orphan pool and a transaction pool.
///
/// Stands in for the persistent block store in the node binary and in tests.
#[derive(Debug)]
pub struct MemoryChain {
    config: ChainConfig,
    state: RwLock<DagState>,
}

impl MemoryChain {
    pub fn new(genesis: Block, config: ChainConfig) -> Self {
        let genesis_hash = genesis.hash();
        let orphans = OrphanPool::new(config.max_orphan_blocks, config.orphan_expiration);
        let state = DagState {
            blocks: HashMap::from([(genesis_hash, genesis)]),
            layers: HashMap::from([(genesis_hash, 0)]),
            tips: BTreeSet::from([genesis_hash]),
            order: vec![genesis_hash],
            orphans,
            mempool: HashMap::new(),
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    /// Connect a block, or park it as an orphan when a parent is unknown.
    ///
    /// Connecting a block also connects every orphan it unblocks.
    pub fn process_block(&self, block: Block) -> BlockStatus {
        let mut state = self.state.write();
        let hash = block.hash();

        if state.blocks.contains_key(&hash) || state.orphans.contains(&hash) {
            return BlockStatus::Duplicate;
        }

        if !block.parents().iter().all(|p| state.blocks.contains_key(p)) {
            debug!(block = %hash, "Block is orphan (parent unknown)");
            state.orphans.add(block, Instant::now());
            return BlockStatus::Orphan;
        }

        Self::connect(&mut state, block);

        let mut resolved = 0;
        let mut frontier = vec![hash];
        while let Some(parent) = frontier.pop() {
            for child in state.orphans.children_of(&parent) {
                let ready = state
                    .orphans
                    .get(&child)
                    .is_some_and(|b| b.parents().iter().all(|p| state.blocks.contains_key(p)));
                if !ready {
                    continue;
                }
                if let Some(orphan) = state.orphans.remove(&child) {
                    Self::connect(&mut state, orphan);
                    resolved += 1;
                    frontier.push(child);
                }
            }
        }

        if resolved > 0 {
            debug!(block = %hash, resolved, "Connected orphans");
        }
        BlockStatus::Connected { resolved }
    }

    fn connect(state: &mut DagState, block: Block) {
        let hash = block.hash();
        let layer = block
            .parents()
            .iter()
            .filter_map(|p| state.layers.get(p))
            .max()
            .map_or(0, |l| l + 1);

        for parent in block.parents() {
            state.tips.remove(parent);
        }
        state.tips.insert(hash);
        state.layers.insert(hash, layer);
        state.order.push(hash);
        for tx in &block.transactions {
            state.mempool.remove(&tx.tx_hash());
        }
        state.blocks.insert(hash, block);
        trace!(block = %hash, layer, "Connected block");
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.read().blocks.contains_key(hash)
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.state.read().orphans.contains(hash)
    }

    pub fn add_transaction(&self, desc: TxDesc) {
        let hash = desc.tx.tx_hash();
        self.state.write().mempool.insert(hash, desc);
    }

    fn graph_state(state: &DagState) -> GraphState {
        let layer = state.layers.values().copied().max().unwrap_or(0);
        GraphState {
            tips: state.tips.clone(),
            total: state.blocks.len() as u64,
            layer,
            main_height: layer,
            main_order: state.order.len().saturating_sub(1) as u64,
        }
    }

    fn main_tip(state: &DagState) -> Hash {
        state
            .tips
            .iter()
            .max_by_key(|tip| (state.layers.get(*tip).copied().unwrap_or(0), **tip))
            .copied()
            .unwrap_or_default()
    }
}

impl Chain for MemoryChain {
    fn best_snapshot(&self) -> BestState {
        let state = self.state.read();
        BestState {
            hash: Self::main_tip(&state),
            graph_state: Self::graph_state(&state),
        }
    }

    fn is_current(&self) -> bool {
        let state = self.state.read();
        let tip = Self::main_tip(&state);
        let Some(block) = state.blocks.get(&tip) else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        block.header.timestamp + self.config.max_tip_age_secs >= now
    }

    fn orphans_total(&self) -> usize {
        self.state.read().orphans.len()
    }

    fn refresh_orphans(&self) {
        let evicted = self.state.write().orphans.refresh(Instant::now());
        if evicted > 0 {
            debug!(evicted, "Evicted stale orphans");
        }
    }

    fn recent_orphans_parents(&self) -> Vec<Hash> {
        let state = self.state.read();
        state.orphans.recent_parents(
            Instant::now(),
            self.config.recent_orphan_window,
            |hash| state.blocks.contains_key(hash),
        )
    }

    fn max_orphan_blocks(&self) -> usize {
        self.config.max_orphan_blocks
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.state.read().blocks.get(hash).cloned()
    }
}

impl TxMemPool for MemoryChain {
    fn tx_descs(&self) -> Vec<TxDesc> {
        let mut descs: Vec<TxDesc> = self.state.read().mempool.values().cloned().collect();
        descs.sort_by_key(|desc| (desc.added, desc.tx.tx_hash()));
        descs
    }

    fn fetch_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.state.read().mempool.get(hash).map(|desc| desc.tx.clone())
    }
}
