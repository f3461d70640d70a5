/// Outbound requests issued by the sync core.
///
/// [`SyncNetwork`] abstracts the wire so the dispatch loop can be driven by
/// mocks in tests. [`ChannelNetwork`] is the production adapter: it forwards
/// every request to the transport task over an unbounded channel.
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use containers::{Block, GraphState, Hash, Inventory, MerkleBlock, Transaction};
use tokio::sync::{mpsc, oneshot};

use crate::types::PeerId;

#[async_trait]
pub trait SyncNetwork: Send + Sync + 'static {
    /// Ask `peer` for the blocks with the given hashes.
    async fn request_blocks(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()>;

    async fn request_block_datas(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()>;

    async fn request_txs(&self, peer: PeerId, txs: Vec<Hash>) -> Result<()>;

    /// Query the current graph state of `peer`.
    async fn request_graph_state(&self, peer: PeerId) -> Result<GraphState>;

    /// Start a DAG sync round with `peer` from our graph state.
    async fn sync_dag_blocks(&self, peer: PeerId, local: GraphState) -> Result<()>;

    async fn sync_qnr(&self, peer: PeerId, qnr: String) -> Result<()>;

    async fn send_inventory(&self, peer: PeerId, inventory: Inventory) -> Result<()>;

    async fn send_not_found(&self, peer: PeerId, inventory: Inventory) -> Result<()>;

    async fn send_transaction(&self, peer: PeerId, tx: Transaction) -> Result<()>;

    async fn send_block(&self, peer: PeerId, block: Block) -> Result<()>;

    async fn send_merkle_block(&self, peer: PeerId, block: MerkleBlock) -> Result<()>;
}

#[derive(Debug)]
pub enum OutboundSyncRequest {
    GetBlocks {
        peer: PeerId,
        blocks: Vec<Hash>,
    },
    GetBlockDatas {
        peer: PeerId,
        blocks: Vec<Hash>,
    },
    GetTxs {
        peer: PeerId,
        txs: Vec<Hash>,
    },
    GraphState {
        peer: PeerId,
        reply: oneshot::Sender<GraphState>,
    },
    SyncDagBlocks {
        peer: PeerId,
        graph_state: GraphState,
    },
    SyncQnr {
        peer: PeerId,
        qnr: String,
    },
    Inventory {
        peer: PeerId,
        inventory: Inventory,
    },
    NotFound {
        peer: PeerId,
        inventory: Inventory,
    },
    Transaction {
        peer: PeerId,
        tx: Transaction,
    },
    Block {
        peer: PeerId,
        block: Block,
    },
    MerkleBlock {
        peer: PeerId,
        block: MerkleBlock,
    },
}

impl OutboundSyncRequest {
    pub fn peer(&self) -> &PeerId {
        match self {
            OutboundSyncRequest::GetBlocks { peer, .. }
            | OutboundSyncRequest::GetBlockDatas { peer, .. }
            | OutboundSyncRequest::GetTxs { peer, .. }
            | OutboundSyncRequest::GraphState { peer, .. }
            | OutboundSyncRequest::SyncDagBlocks { peer, .. }
            | OutboundSyncRequest::SyncQnr { peer, .. }
            | OutboundSyncRequest::Inventory { peer, .. }
            | OutboundSyncRequest::NotFound { peer, .. }
            | OutboundSyncRequest::Transaction { peer, .. }
            | OutboundSyncRequest::Block { peer, .. }
            | OutboundSyncRequest::MerkleBlock { peer, .. } => peer,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundSyncRequest::GetBlocks { .. } => "getblocks",
            OutboundSyncRequest::GetBlockDatas { .. } => "getblockdatas",
            OutboundSyncRequest::GetTxs { .. } => "gettxs",
            OutboundSyncRequest::GraphState { .. } => "graphstate",
            OutboundSyncRequest::SyncDagBlocks { .. } => "syncdag",
            OutboundSyncRequest::SyncQnr { .. } => "syncqnr",
            OutboundSyncRequest::Inventory { .. } => "inv",
            OutboundSyncRequest::NotFound { .. } => "notfound",
            OutboundSyncRequest::Transaction { .. } => "tx",
            OutboundSyncRequest::Block { .. } => "block",
            OutboundSyncRequest::MerkleBlock { .. } => "merkleblock",
        }
    }
}

impl fmt::Display for OutboundSyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.kind(), self.peer())
    }
}

/// [`SyncNetwork`] backed by the transport's request channel.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    sink: mpsc::UnboundedSender<OutboundSyncRequest>,
    graph_state_timeout: Duration,
}

impl ChannelNetwork {
    pub fn new(
        sink: mpsc::UnboundedSender<OutboundSyncRequest>,
        graph_state_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            graph_state_timeout,
        }
    }

    fn send(&self, request: OutboundSyncRequest) -> Result<()> {
        self.sink
            .send(request)
            .map_err(|err| anyhow!("failed to send {} to transport", err.0))
    }
}

#[async_trait]
impl SyncNetwork for ChannelNetwork {
    async fn request_blocks(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()> {
        self.send(OutboundSyncRequest::GetBlocks { peer, blocks })
    }

    async fn request_block_datas(&self, peer: PeerId, blocks: Vec<Hash>) -> Result<()> {
        self.send(OutboundSyncRequest::GetBlockDatas { peer, blocks })
    }

    async fn request_txs(&self, peer: PeerId, txs: Vec<Hash>) -> Result<()> {
        self.send(OutboundSyncRequest::GetTxs { peer, txs })
    }

    async fn request_graph_state(&self, peer: PeerId) -> Result<GraphState> {
        let (reply, response) = oneshot::channel();
        self.send(OutboundSyncRequest::GraphState {
            peer: peer.clone(),
            reply,
        })?;

        match tokio::time::timeout(self.graph_state_timeout, response).await {
            Ok(Ok(graph_state)) => Ok(graph_state),
            Ok(Err(_)) => Err(anyhow!("peer {peer} dropped graph state request")),
            Err(_) => Err(anyhow!("graph state request to {peer} timed out")),
        }
    }

    async fn sync_dag_blocks(&self, peer: PeerId, local: GraphState) -> Result<()> {
        self.send(OutboundSyncRequest::SyncDagBlocks {
            peer,
            graph_state: local,
        })
    }

    async fn sync_qnr(&self, peer: PeerId, qnr: String) -> Result<()> {
        self.send(OutboundSyncRequest::SyncQnr { peer, qnr })
    }

    async fn send_inventory(&self, peer: PeerId, inventory: Inventory) -> Result<()> {
        self.send(OutboundSyncRequest::Inventory { peer, inventory })
    }

    async fn send_not_found(&self, peer: PeerId, inventory: Inventory) -> Result<()> {
        self.send(OutboundSyncRequest::NotFound { peer, inventory })
    }

    async fn send_transaction(&self, peer: PeerId, tx: Transaction) -> Result<()> {
        self.send(OutboundSyncRequest::Transaction { peer, tx })
    }

    async fn send_block(&self, peer: PeerId, block: Block) -> Result<()> {
        self.send(OutboundSyncRequest::Block { peer, block })
    }

    async fn send_merkle_block(&self, peer: PeerId, block: MerkleBlock) -> Result<()> {
        self.send(OutboundSyncRequest::MerkleBlock { peer, block })
    }
}
