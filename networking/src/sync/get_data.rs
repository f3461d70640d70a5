/// Serving `getdata` requests.
///
/// Replies are pushed to the peer in request order by a single background
/// task. Anything we do not have is collected into one not-found inventory.
use std::sync::Arc;

use containers::{Block, InvType, Inventory, MerkleBlock, Transaction};
use tracing::{debug, trace};

use super::{network::SyncNetwork, service::PeerSync};
use crate::types::PeerId;

#[derive(Debug)]
enum DataReply {
    Transaction(Transaction),
    Block(Block),
    MerkleBlock(MerkleBlock, Vec<Transaction>),
}

impl<N: SyncNetwork> PeerSync<N> {
    pub(super) fn on_get_data(self: &Arc<Self>, id: PeerId, inventory: Inventory) {
        let Some(peer) = self.peers.get(&id) else {
            debug!(peer = %id, "Ignoring getdata from unknown peer");
            return;
        };

        let mut replies = Vec::new();
        let mut not_found = Inventory::new();

        for iv in inventory.invs() {
            let reply = match iv.inv_type {
                InvType::Tx => self.mempool.fetch_transaction(&iv.hash).map(DataReply::Transaction),
                InvType::Block => self.chain.block_by_hash(&iv.hash).map(DataReply::Block),
                InvType::FilteredBlock => {
                    if !peer.filter_loaded() {
                        trace!(peer = %id, hash = %iv.hash, "Filtered block requested without a filter");
                        continue;
                    }
                    self.chain.block_by_hash(&iv.hash).map(|block| {
                        let (merkle, matched) = peer.with_filter(|filter| filter.filter_block(&block));
                        let txs = matched
                            .into_iter()
                            .filter_map(|index| block.transactions.get(index).cloned())
                            .collect();
                        DataReply::MerkleBlock(merkle, txs)
                    })
                }
                InvType::Error => {
                    debug!(peer = %id, hash = %iv.hash, "Unknown type in inventory request");
                    continue;
                }
            };

            match reply {
                Some(reply) => replies.push(reply),
                None => {
                    if not_found.add_inv_vect(*iv).is_err() {
                        break;
                    }
                }
            }
        }

        if replies.is_empty() && not_found.is_empty() {
            return;
        }
        debug!(
            peer = %id,
            found = replies.len(),
            not_found = not_found.len(),
            "Serving getdata"
        );

        let network = self.network.clone();
        let target = id.clone();
        self.spawn_send("getdata", id, async move {
            for reply in replies {
                match reply {
                    DataReply::Transaction(tx) => network.send_transaction(target.clone(), tx).await?,
                    DataReply::Block(block) => network.send_block(target.clone(), block).await?,
                    DataReply::MerkleBlock(merkle, txs) => {
                        network.send_merkle_block(target.clone(), merkle).await?;
                        for tx in txs {
                            network.send_transaction(target.clone(), tx).await?;
                        }
                    }
                }
            }
            if !not_found.is_empty() {
                network.send_not_found(target, not_found).await?;
            }
            Ok(())
        });
    }
}
