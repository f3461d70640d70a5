/// Stall detection for the current sync peer.
///
/// Each tick records the sync peer's graph state together with the local one.
/// If neither has changed by the next tick the peer is considered stalled.
use containers::GraphState;

use crate::types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallVerdict {
    /// No sync peer.
    Idle,
    /// First sample for this peer.
    Sampled,
    Progressing,
    Stalled,
}

#[derive(Debug, Clone)]
struct Sample {
    peer: PeerId,
    peer_state: Option<GraphState>,
    local_state: GraphState,
}

#[derive(Debug, Default)]
pub struct StallMonitor {
    last: Option<Sample>,
}

impl StallMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &mut self,
        sync_peer: Option<(&PeerId, Option<&GraphState>)>,
        local: &GraphState,
    ) -> StallVerdict {
        let Some((peer, peer_state)) = sync_peer else {
            self.last = None;
            return StallVerdict::Idle;
        };

        let sample = Sample {
            peer: peer.clone(),
            peer_state: peer_state.cloned(),
            local_state: local.clone(),
        };

        let verdict = match &self.last {
            Some(last) if last.peer != sample.peer => StallVerdict::Sampled,
            None => StallVerdict::Sampled,
            Some(last)
                if last.peer_state == sample.peer_state
                    && last.local_state == sample.local_state =>
            {
                StallVerdict::Stalled
            }
            Some(_) => StallVerdict::Progressing,
        };

        self.last = match verdict {
            StallVerdict::Stalled => None,
            _ => Some(sample),
        };
        verdict
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
