/// Peer synchronization for the DAG node.
///
/// This module keeps the local block DAG converging with the network. It
/// includes:
///
/// - **Peer Selection**: Picks the single peer whose graph state is furthest ahead
/// - **Orphan Policy**: Requests missing orphan parents before a general DAG sync round
/// - **Stall Monitor**: Replaces a sync peer that makes no verifiable progress
/// - **Relay**: Announces new transactions and blocks, honouring per-peer filters
/// - **Filters**: Bloom filter, fee filter and mempool request handlers
/// - **Sync Service**: The dispatch loop that serializes all of the above
///
/// ## Architecture
///
/// The service operates reactively:
/// 1. Transport and chain events are enqueued as [`SyncMessage`]s
/// 2. The dispatch loop handles them one at a time
/// 3. Network requests run in background tasks
/// 4. Failed requests mark the peer unhealthy and come back as peer updates
/// 5. A periodic tick checks the sync peer for stalls
///
/// ## Lifecycle
///
/// - **Created**: Messages may be enqueued, nothing is processed
/// - **Started**: The dispatch loop runs
/// - **Shutdown**: Producers are no-ops; the loop drains and exits
pub mod config;
pub mod error;
pub mod filters;
mod get_data;
pub mod messages;
pub mod network;
pub mod orphans;
pub mod peer_selection;
pub mod relay;
pub mod service;
pub mod stall;
pub mod states;

pub use config::*;
pub use error::SyncError;
pub use messages::{PauseHandle, SyncMessage};
pub use network::{ChannelNetwork, OutboundSyncRequest, SyncNetwork};
pub use orphans::{plan_fetch, FetchPlan};
pub use peer_selection::{best_peer, SyncCandidate};
pub use relay::{inventory_for_peer, RelayData};
pub use service::PeerSync;
pub use stall::{StallMonitor, StallVerdict};
pub use states::Lifecycle;

#[cfg(test)]
mod tests;
