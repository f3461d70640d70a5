//! Local chain view consumed by the peer synchronization core.
//!
//! The sync core never mutates the DAG or the orphan pool itself. It only
//! decides *when* to call into a [`Chain`] and a [`TxMemPool`].
pub mod config;
pub mod memory;
pub mod orphans;

use containers::{Block, GraphState, Hash, Transaction, TxDesc};

pub use config::{ChainConfig, DEFAULT_CONFIG, MAX_ORPHAN_BLOCKS};
pub use memory::{BlockStatus, MemoryChain};
pub use orphans::OrphanPool;

/// Snapshot of the local best state.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BestState {
    /// Hash of the main chain tip.
    pub hash: Hash,
    pub graph_state: GraphState,
}

pub trait Chain: Send + Sync + 'static {
    fn best_snapshot(&self) -> BestState;

    /// True when the local DAG believes it is caught up with the network.
    fn is_current(&self) -> bool;

    fn orphans_total(&self) -> usize;

    /// Evict stale orphans.
    fn refresh_orphans(&self);

    /// Missing parents of recently received orphans.
    fn recent_orphans_parents(&self) -> Vec<Hash>;

    fn max_orphan_blocks(&self) -> usize {
        MAX_ORPHAN_BLOCKS
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;
}

pub trait TxMemPool: Send + Sync + 'static {
    fn tx_descs(&self) -> Vec<TxDesc>;

    fn fetch_transaction(&self, hash: &Hash) -> Option<Transaction>;
}
