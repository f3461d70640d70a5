/// Bloom filter and mempool request handlers.
///
/// These run on the caller's task rather than the dispatch loop. Every
/// violation disconnects the offending peer and is reported back as an error.
/// After `stop` they do nothing and return `Ok(())`.
use std::sync::Arc;

use containers::{FilterLoad, InvType, InvVect, Inventory, ServiceFlag};
use tracing::{debug, trace, warn};

use super::{error::SyncError, network::SyncNetwork, service::PeerSync};
use crate::peers::Peer;
use crate::types::PeerId;

/// Largest accepted `feefilter` value, in atoms per kB.
pub const MAX_FEE_FILTER: i64 = 21_000_000 * 100_000_000;

impl<N: SyncNetwork> PeerSync<N> {
    pub fn on_filter_add(&self, id: &PeerId, data: &[u8]) -> Result<(), SyncError> {
        const COMMAND: &str = "filteradd";
        let Some(peer) = self.filter_peer(id)? else {
            return Ok(());
        };
        self.enforce_bloom_filters(&peer, COMMAND)?;

        if !peer.filter_loaded() {
            return Err(self.violation(&peer, COMMAND, "no filter loaded"));
        }
        peer.with_filter(|filter| filter.add(data)).map_err(|source| {
            self.disconnect(&peer, COMMAND, &source.to_string());
            SyncError::InvalidFilter {
                peer: id.clone(),
                source,
            }
        })
    }

    pub fn on_filter_clear(&self, id: &PeerId) -> Result<(), SyncError> {
        const COMMAND: &str = "filterclear";
        let Some(peer) = self.filter_peer(id)? else {
            return Ok(());
        };
        self.enforce_bloom_filters(&peer, COMMAND)?;

        if !peer.filter_loaded() {
            return Err(self.violation(&peer, COMMAND, "no filter loaded"));
        }
        peer.with_filter(|filter| filter.unload());
        debug!(peer = %id, "Cleared bloom filter");
        Ok(())
    }

    /// Install a new filter. A filtered peer no longer receives bulk
    /// transaction relay.
    pub fn on_filter_load(&self, id: &PeerId, load: FilterLoad) -> Result<(), SyncError> {
        const COMMAND: &str = "filterload";
        let Some(peer) = self.filter_peer(id)? else {
            return Ok(());
        };
        self.enforce_bloom_filters(&peer, COMMAND)?;

        peer.set_disable_relay_tx(true);
        peer.with_filter(|filter| filter.reload(load)).map_err(|source| {
            self.disconnect(&peer, COMMAND, &source.to_string());
            SyncError::InvalidFilter {
                peer: id.clone(),
                source,
            }
        })?;
        debug!(peer = %id, "Loaded bloom filter");
        Ok(())
    }

    pub fn on_fee_filter(&self, id: &PeerId, fee_per_kb: i64) -> Result<(), SyncError> {
        const COMMAND: &str = "feefilter";
        let Some(peer) = self.filter_peer(id)? else {
            return Ok(());
        };

        let fee_per_kb = match u64::try_from(fee_per_kb) {
            Ok(fee) if fee_per_kb <= MAX_FEE_FILTER => fee,
            _ => {
                return Err(self.violation(
                    &peer,
                    COMMAND,
                    format!("fee filter {fee_per_kb} out of range"),
                ))
            }
        };
        peer.set_fee_filter(fee_per_kb);
        debug!(peer = %id, fee_per_kb, "Updated fee filter");
        Ok(())
    }

    /// Answer a mempool request with the inventory of matching transactions.
    pub fn on_mempool(self: &Arc<Self>, id: &PeerId) -> Result<(), SyncError> {
        const COMMAND: &str = "mempool";
        let Some(peer) = self.filter_peer(id)? else {
            return Ok(());
        };

        if !peer.services().contains(ServiceFlag::BLOOM) {
            return Err(self.violation(&peer, COMMAND, "peer does not support bloom filtering"));
        }

        let max_invs = self.config().max_inv_per_msg;
        let mut inventory = Inventory::new();
        for desc in self.mempool.tx_descs() {
            if inventory.len() >= max_invs {
                break;
            }
            if peer.filter_loaded() && !peer.with_filter(|f| f.match_tx_and_update(&desc.tx)) {
                continue;
            }
            if inventory
                .add_inv_vect(InvVect::new(InvType::Tx, desc.tx.tx_hash()))
                .is_err()
            {
                break;
            }
        }

        if inventory.is_empty() {
            return Ok(());
        }
        debug!(peer = %id, txs = inventory.len(), "Answering mempool request");
        let network = self.network.clone();
        let target = id.clone();
        self.spawn_send("inv", id.clone(), async move {
            network.send_inventory(target, inventory).await
        });
        Ok(())
    }

    /// `None` once the service is shutting down.
    fn filter_peer(&self, id: &PeerId) -> Result<Option<Arc<Peer>>, SyncError> {
        if self.is_shutting_down() {
            trace!(peer = %id, "Peer sync shutting down, ignoring filter message");
            return Ok(None);
        }
        self.peers
            .get(id)
            .map(Some)
            .ok_or_else(|| SyncError::PeerNotFound(id.clone()))
    }

    fn enforce_bloom_filters(&self, peer: &Peer, command: &'static str) -> Result<(), SyncError> {
        if !self.config().enable_bloom_filters {
            return Err(self.violation(peer, command, "bloom filters are disabled"));
        }
        let version = peer.protocol_version();
        if version < self.config().bloom_filter_protocol_version {
            return Err(self.violation(
                peer,
                command,
                format!("protocol version {version} does not support bloom filters"),
            ));
        }
        Ok(())
    }

    fn violation(&self, peer: &Peer, command: &'static str, reason: impl Into<String>) -> SyncError {
        let reason = reason.into();
        self.disconnect(peer, command, &reason);
        SyncError::ProtocolViolation {
            peer: peer.id().clone(),
            command,
            reason,
        }
    }

    fn disconnect(&self, peer: &Peer, command: &'static str, reason: &str) {
        warn!(peer = %peer.id(), command, reason, "Disconnecting peer");
        if let Some(metrics) = &self.metrics {
            metrics.inc_protocol_violations(command);
        }
        self.peers.disconnect(peer.id());
    }
}
