/// Orphan-aware fetch planning.
///
/// Missing parents of recent orphans are always requested before a general
/// DAG sync round. The orphan pool is refreshed first when it is saturated or
/// when the caller asks for it.
use chain::Chain;
use containers::Hash;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Request these parents with get-blocks.
    OrphanParents(Vec<Hash>),
    /// No orphan parents outstanding; run a DAG sync round.
    DagBlocks,
}

pub fn plan_fetch<C: Chain + ?Sized>(chain: &C, refresh: bool) -> FetchPlan {
    let orphans = chain.orphans_total();
    if refresh || orphans >= chain.max_orphan_blocks() {
        debug!(orphans, refresh, "Refreshing orphan pool");
        chain.refresh_orphans();
    }

    let parents = chain.recent_orphans_parents();
    if parents.is_empty() {
        FetchPlan::DagBlocks
    } else {
        FetchPlan::OrphanParents(parents)
    }
}
