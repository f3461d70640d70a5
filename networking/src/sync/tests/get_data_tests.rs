use containers::{Block, BloomUpdateType, FilterLoad, Hash, InvType, InvVect, Inventory, TxDesc};
use pretty_assertions::assert_eq;

use super::{graph_state, test_tx, wait_for, Call, Harness};
use crate::types::PeerId;

fn request(invs: &[InvVect]) -> Inventory {
    invs.iter().copied().collect()
}

#[tokio::test]
async fn test_serves_known_data_and_reports_missing() {
    let h = Harness::new(graph_state(1));
    h.sync.start();
    let peer = h.add_peer("a", None);

    let tx = test_tx(1, vec![0x51]);
    h.mempool.add(TxDesc::new(tx.clone(), 1_000));
    let block = Block::new(vec![], 7);
    h.chain.add_block(block.clone());
    let missing = InvVect::new(InvType::Block, Hash([9; 32]));

    h.sync.get_data(
        peer.id().clone(),
        request(&[
            InvVect::new(InvType::Tx, tx.tx_hash()),
            InvVect::new(InvType::Block, block.hash()),
            missing,
        ]),
    );

    wait_for(|| h.network.calls().len() == 3).await;
    let id = PeerId::from("a");
    assert_eq!(
        h.network.calls(),
        vec![
            Call::Transaction(id.clone(), tx.tx_hash()),
            Call::Block(id.clone(), block.hash()),
            Call::NotFound(id, request(&[missing])),
        ]
    );
    h.sync.stop().await;
}

#[tokio::test]
async fn test_filtered_block_requires_loaded_filter() {
    let h = Harness::new(graph_state(1));
    h.sync.start();
    let peer = h.add_peer("a", None);
    let block = Block::new(vec![], 7);
    h.chain.add_block(block.clone());

    h.sync.get_data(
        peer.id().clone(),
        request(&[InvVect::new(InvType::FilteredBlock, block.hash())]),
    );
    h.settle().await;

    assert!(h.network.calls().is_empty());
    h.sync.stop().await;
}

#[tokio::test]
async fn test_filtered_block_sends_matched_transactions() {
    let h = Harness::new(graph_state(1));
    h.sync.start();
    let peer = h.add_peer("a", None);

    let wanted = test_tx(1, vec![0x51]);
    let mut block = Block::new(vec![], 7);
    block.transactions = vec![test_tx(2, vec![0x52]), wanted.clone()];
    h.chain.add_block(block.clone());

    peer.with_filter(|filter| {
        filter
            .reload(FilterLoad::with_params(10, 0.0001, 0, BloomUpdateType::None))
            .unwrap();
        filter.add(wanted.tx_hash().as_bytes()).unwrap();
    });

    h.sync.get_data(
        peer.id().clone(),
        request(&[InvVect::new(InvType::FilteredBlock, block.hash())]),
    );

    wait_for(|| h.network.calls().len() == 2).await;
    let calls = h.network.calls();
    match &calls[0] {
        Call::MerkleBlock(_, merkle) => {
            assert_eq!(merkle.total_transactions, 2);
            assert_eq!(merkle.matched, vec![wanted.tx_hash()]);
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert_eq!(calls[1], Call::Transaction(PeerId::from("a"), wanted.tx_hash()));
    h.sync.stop().await;
}

#[tokio::test]
async fn test_unknown_peer_is_ignored() {
    let h = Harness::new(graph_state(1));
    h.sync.start();

    h.sync.get_data(
        PeerId::from("nobody"),
        request(&[InvVect::new(InvType::Block, Hash([1; 32]))]),
    );
    h.settle().await;

    assert!(h.network.calls().is_empty());
    h.sync.stop().await;
}
