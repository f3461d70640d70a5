/// Inventory relay to connected peers.
///
/// Each peer gets its own inventory. Transactions are dropped per peer when
/// the peer disabled transaction relay, when the fee rate is below its fee
/// filter, or when its bloom filter does not match. Empty inventories are
/// never sent.
use std::sync::Arc;

use containers::{BlockHeader, InvType, InvVect, Inventory, TxDesc};
use tracing::trace;

use super::{network::SyncNetwork, service::PeerSync};
use crate::peers::Peer;
use crate::types::ConnectionState;

#[derive(Debug, Clone)]
pub enum RelayData {
    Transactions(Vec<TxDesc>),
    Block(BlockHeader),
}

impl RelayData {
    pub fn inv_type(&self) -> InvType {
        match self {
            RelayData::Transactions(_) => InvType::Tx,
            RelayData::Block(_) => InvType::Block,
        }
    }
}

/// Inventory to announce to `peer`, at most `max_invs` vectors.
pub fn inventory_for_peer(peer: &Peer, data: &RelayData, max_invs: usize) -> Inventory {
    match data {
        RelayData::Block(header) => {
            std::iter::once(InvVect::new(InvType::Block, header.block_hash())).collect()
        }
        RelayData::Transactions(descs) => {
            let mut inventory = Inventory::new();
            if peer.disable_relay_tx() {
                return inventory;
            }

            let fee_filter = peer.fee_filter();
            for desc in descs {
                if inventory.len() >= max_invs {
                    break;
                }
                if fee_filter > 0 && desc.fee_per_kb < fee_filter {
                    continue;
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
            inventory
        }
    }
}

impl<N: SyncNetwork> PeerSync<N> {
    /// Announce `data` to every connected peer.
    pub fn relay_inventory(self: &Arc<Self>, data: RelayData) {
        if self.is_shutting_down() {
            return;
        }

        let max_invs = self.config().max_inv_per_msg;
        let mut relayed = 0u64;
        self.peers
            .for_peers(ConnectionState::Connected, &mut |peer: &Arc<Peer>| {
                let inventory = inventory_for_peer(peer, &data, max_invs);
                if inventory.is_empty() {
                    trace!(peer = %peer.id(), "Nothing to relay to peer");
                    return;
                }
                relayed += inventory.len() as u64;

                let network = self.network.clone();
                let target = peer.id().clone();
                self.spawn_send("inv", peer.id().clone(), async move {
                    network.send_inventory(target, inventory).await
                });
            });

        if let Some(metrics) = &self.metrics {
            metrics.inc_inventory_relayed(&data.inv_type().to_string(), relayed);
        }
    }
}
