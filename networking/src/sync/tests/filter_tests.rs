use std::sync::Arc;

use containers::{
    BloomUpdateType, FilterLoad, InvType, InvVect, Inventory, ServiceFlag, TxDesc,
    MAX_FILTER_ADD_DATA_SIZE, MAX_FILTER_LOAD_HASH_FUNCS,
};
use pretty_assertions::assert_eq;

use super::{graph_state, test_tx, wait_for, Call, Harness};
use crate::peers::Peer;
use crate::sync::{SyncConfig, SyncError, BLOOM_FILTER_PROTOCOL_VERSION};
use crate::types::{ConnectionState, Direction, PeerId};

fn filter_load() -> FilterLoad {
    FilterLoad::with_params(10, 0.0001, 0, BloomUpdateType::All)
}

fn bloom_peer(h: &Harness, id: &str) -> Arc<Peer> {
    h.peers.add_peer(
        Peer::new(id, Direction::Inbound)
            .with_protocol_version(BLOOM_FILTER_PROTOCOL_VERSION)
            .with_services(ServiceFlag::FULL_NODE | ServiceFlag::BLOOM),
    )
}

fn assert_disconnected(h: &mut Harness, peer: &Peer) {
    assert_eq!(peer.connection_state(), ConnectionState::Disconnecting);
    assert_eq!(h.disconnects.try_recv().ok(), Some(peer.id().clone()));
}

#[test]
fn test_filter_add_without_filter_disconnects() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");

    let err = h.sync.on_filter_add(peer.id(), b"data").unwrap_err();
    assert!(matches!(err, SyncError::ProtocolViolation { command: "filteradd", .. }));
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_filter_clear_without_filter_disconnects() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");

    let err = h.sync.on_filter_clear(peer.id()).unwrap_err();
    assert!(matches!(err, SyncError::ProtocolViolation { command: "filterclear", .. }));
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_load_add_clear_sequence() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");

    h.sync.on_filter_load(peer.id(), filter_load()).unwrap();
    assert!(peer.filter_loaded());
    assert!(peer.disable_relay_tx());

    h.sync.on_filter_add(peer.id(), b"outpoint").unwrap();
    assert!(peer.with_filter(|filter| filter.matches(b"outpoint")));

    h.sync.on_filter_clear(peer.id()).unwrap();
    assert!(!peer.filter_loaded());
    assert_eq!(peer.connection_state(), ConnectionState::Connected);
    assert!(h.disconnects.try_recv().is_err());
}

#[test]
fn test_filters_rejected_when_node_disables_bloom() {
    let config = SyncConfig {
        enable_bloom_filters: false,
        ..SyncConfig::default()
    };
    let mut h = Harness::with_config(graph_state(1), config);
    let peer = bloom_peer(&h, "a");

    assert!(h.sync.on_filter_load(peer.id(), filter_load()).is_err());
    assert!(!peer.filter_loaded());
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_filters_rejected_for_old_protocol_version() {
    let mut h = Harness::new(graph_state(1));
    let peer = h.peers.add_peer(
        Peer::new("a", Direction::Inbound).with_protocol_version(BLOOM_FILTER_PROTOCOL_VERSION - 1),
    );

    assert!(h.sync.on_filter_load(peer.id(), filter_load()).is_err());
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_invalid_filter_parameters_disconnect() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");

    let mut load = filter_load();
    load.hash_funcs = MAX_FILTER_LOAD_HASH_FUNCS + 1;
    let err = h.sync.on_filter_load(peer.id(), load).unwrap_err();
    assert!(matches!(err, SyncError::InvalidFilter { .. }));
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_oversized_filter_add_disconnects() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");
    h.sync.on_filter_load(peer.id(), filter_load()).unwrap();

    let data = vec![0u8; MAX_FILTER_ADD_DATA_SIZE + 1];
    let err = h.sync.on_filter_add(peer.id(), &data).unwrap_err();
    assert!(matches!(err, SyncError::InvalidFilter { .. }));
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_unknown_peer() {
    let h = Harness::new(graph_state(1));
    let err = h.sync.on_filter_clear(&PeerId::from("nobody")).unwrap_err();
    assert!(matches!(err, SyncError::PeerNotFound(_)));
}

#[test]
fn test_fee_filter_range() {
    let mut h = Harness::new(graph_state(1));
    let peer = bloom_peer(&h, "a");

    h.sync.on_fee_filter(peer.id(), 2_000).unwrap();
    assert_eq!(peer.fee_filter(), 2_000);

    assert!(h.sync.on_fee_filter(peer.id(), -1).is_err());
    assert_eq!(peer.fee_filter(), 2_000);
    assert_disconnected(&mut h, &peer);
}

#[test]
fn test_mempool_without_bloom_service_disconnects() {
    let mut h = Harness::new(graph_state(1));
    let peer = h.add_peer("a", None);

    let err = h.sync.on_mempool(peer.id()).unwrap_err();
    assert!(matches!(err, SyncError::ProtocolViolation { command: "mempool", .. }));
    assert_disconnected(&mut h, &peer);
}

#[tokio::test]
async fn test_mempool_answers_with_filtered_inventory() {
    let h = Harness::new(graph_state(1));
    h.sync.start();
    let peer = bloom_peer(&h, "a");

    let wanted = test_tx(1, vec![0x51]);
    h.mempool.add(TxDesc::new(wanted.clone(), 1_000));
    h.mempool.add(TxDesc::new(test_tx(2, vec![0x52]), 1_000));

    h.sync.on_filter_load(peer.id(), filter_load()).unwrap();
    h.sync.on_filter_add(peer.id(), wanted.tx_hash().as_bytes()).unwrap();
    h.sync.on_mempool(peer.id()).unwrap();

    wait_for(|| !h.network.calls().is_empty()).await;
    let expected: Inventory = std::iter::once(InvVect::new(InvType::Tx, wanted.tx_hash())).collect();
    assert_eq!(h.network.calls(), vec![Call::Inventory(peer.id().clone(), expected)]);
    h.sync.stop().await;
}

#[tokio::test]
async fn test_mempool_inventory_is_capped() {
    let config = SyncConfig {
        max_inv_per_msg: 2,
        ..SyncConfig::default()
    };
    let h = Harness::with_config(graph_state(1), config);
    h.sync.start();
    let peer = bloom_peer(&h, "a");
    for seed in 0..5 {
        h.mempool.add(TxDesc::new(test_tx(seed, vec![]), 1_000));
    }

    h.sync.on_mempool(peer.id()).unwrap();

    wait_for(|| !h.network.calls().is_empty()).await;
    match &h.network.calls()[0] {
        Call::Inventory(_, inventory) => assert_eq!(inventory.len(), 2),
        other => panic!("unexpected call {other:?}"),
    }
    h.sync.stop().await;
}

#[tokio::test]
async fn test_filter_messages_ignored_after_stop() {
    let mut h = Harness::new(graph_state(1));
    h.sync.start();
    let peer = bloom_peer(&h, "a");
    h.mempool.add(TxDesc::new(test_tx(1, vec![0x51]), 1_000));
    h.sync.stop().await;

    assert!(h.sync.on_filter_load(peer.id(), filter_load()).is_ok());
    assert!(!peer.filter_loaded());
    assert!(!peer.disable_relay_tx());
    assert!(h.sync.on_filter_add(peer.id(), b"data").is_ok());
    assert!(h.sync.on_filter_clear(peer.id()).is_ok());
    assert!(h.sync.on_fee_filter(peer.id(), -1).is_ok());
    assert!(h.sync.on_mempool(peer.id()).is_ok());
    tokio::task::yield_now().await;

    assert!(h.network.calls().is_empty());
    assert_eq!(peer.connection_state(), ConnectionState::Connected);
    assert!(h.disconnects.try_recv().is_err());
}
