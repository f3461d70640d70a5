use std::fmt;

use containers::{Hash, Inventory};
use tokio::sync::oneshot;

use crate::types::PeerId;

/// Work items consumed by the dispatch loop.
///
/// The set is closed; inbound commands the node does not understand arrive as
/// [`SyncMessage::Unknown`] and are logged and dropped.
#[derive(Debug)]
pub enum SyncMessage {
    Connected(PeerId),
    Disconnected(PeerId),
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
    UpdateGraphState(PeerId),
    SyncDagBlocks(PeerId),
    PeerUpdate {
        peer: Option<PeerId>,
        orphan: bool,
    },
    /// Suspend the loop. `paused` is signalled once the loop is parked;
    /// it resumes when `resume` fires or its sender is dropped.
    Pause {
        paused: oneshot::Sender<()>,
        resume: oneshot::Receiver<()>,
    },
    SyncQnr {
        peer: PeerId,
        qnr: String,
    },
    GetData {
        peer: PeerId,
        inventory: Inventory,
    },
    Unknown {
        command: String,
    },
}

impl SyncMessage {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Connected(_) => "connected",
            SyncMessage::Disconnected(_) => "disconnected",
            SyncMessage::GetBlocks { .. } => "get_blocks",
            SyncMessage::GetBlockDatas { .. } => "get_block_datas",
            SyncMessage::GetTxs { .. } => "get_txs",
            SyncMessage::UpdateGraphState(_) => "update_graph_state",
            SyncMessage::SyncDagBlocks(_) => "sync_dag_blocks",
            SyncMessage::PeerUpdate { .. } => "peer_update",
            SyncMessage::Pause { .. } => "pause",
            SyncMessage::SyncQnr { .. } => "sync_qnr",
            SyncMessage::GetData { .. } => "get_data",
            SyncMessage::Unknown { .. } => "unknown",
        }
    }

    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            SyncMessage::Connected(peer)
            | SyncMessage::Disconnected(peer)
            | SyncMessage::UpdateGraphState(peer)
            | SyncMessage::SyncDagBlocks(peer)
            | SyncMessage::GetBlocks { peer, .. }
            | SyncMessage::GetBlockDatas { peer, .. }
            | SyncMessage::GetTxs { peer, .. }
            | SyncMessage::SyncQnr { peer, .. }
            | SyncMessage::GetData { peer, .. } => Some(peer),
            SyncMessage::PeerUpdate { peer, .. } => peer.as_ref(),
            SyncMessage::Pause { .. } | SyncMessage::Unknown { .. } => None,
        }
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.peer()) {
            (SyncMessage::Unknown { command }, _) => write!(f, "unknown({command})"),
            (_, Some(peer)) => write!(f, "{}({peer})", self.kind()),
            (_, None) => f.write_str(self.kind()),
        }
    }
}

/// Keeps the dispatch loop suspended while alive.
#[derive(Debug)]
pub struct PauseHandle {
    resume: oneshot::Sender<()>,
}

impl PauseHandle {
    pub(crate) fn new(resume: oneshot::Sender<()>) -> Self {
        Self { resume }
    }

    /// Let the dispatch loop continue. Dropping the handle does the same.
    pub fn resume(self) {
        let _ = self.resume.send(());
    }
}
