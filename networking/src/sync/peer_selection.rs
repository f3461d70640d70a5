/// Best sync peer selection.
///
/// A candidate must be active and advertise a graph state strictly ahead of
/// the local one. Among candidates the most advanced state wins; peers whose
/// state is equal to the winner's are tied and the greatest id breaks the tie,
/// so the result does not depend on enumeration order.
use std::sync::Arc;

use containers::GraphState;

use crate::peers::Peer;

/// Selected peer with the graph state it was chosen for.
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub peer: Arc<Peer>,
    pub graph_state: GraphState,
}

pub fn best_peer(local: &GraphState, peers: &[Arc<Peer>]) -> Option<SyncCandidate> {
    let mut best: Option<SyncCandidate> = None;
    let mut equals: Vec<Arc<Peer>> = Vec::new();

    for peer in peers {
        if !peer.is_active() {
            continue;
        }
        // Snapshot once; the peer may publish a new state concurrently.
        let Some(graph_state) = peer.graph_state() else {
            continue;
        };
        if !graph_state.is_excellent(local) {
            continue;
        }

        match &best {
            None => {
                best = Some(SyncCandidate {
                    peer: peer.clone(),
                    graph_state,
                });
            }
            Some(current) if graph_state.is_excellent(&current.graph_state) => {
                best = Some(SyncCandidate {
                    peer: peer.clone(),
                    graph_state,
                });
                equals.clear();
            }
            Some(current) if graph_state.is_equal(&current.graph_state) => {
                equals.push(peer.clone());
            }
            Some(_) => {}
        }
    }

    let mut best = best?;
    for peer in equals {
        if peer.id() > best.peer.id() {
            best.peer = peer;
        }
    }
    Some(best)
}
