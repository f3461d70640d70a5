use containers::FilterError;
use thiserror::Error;

use crate::types::PeerId;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("peer {peer} sent {command}: {reason}")]
    ProtocolViolation {
        peer: PeerId,
        command: &'static str,
        reason: String,
    },

    #[error("{kind} request to peer {peer} failed: {reason}")]
    FetchFailed {
        peer: PeerId,
        kind: &'static str,
        reason: String,
    },

    #[error("peer sync is not running")]
    NotRunning,

    #[error("invalid filter from peer {peer}: {source}")]
    InvalidFilter {
        peer: PeerId,
        #[source]
        source: FilterError,
    },
}
