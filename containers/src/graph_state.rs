use crate::Hash;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Snapshot of DAG progress as advertised by a node.
///
/// Two states are compared by main-chain height first, then by main-chain
/// order, total block count, layer and tip count. When all counters agree the
/// sorted tip sets are compared lexicographically, so two distinct states are
/// always strictly ordered and only identical states are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    /// Current DAG tips.
    pub tips: BTreeSet<Hash>,
    /// Total number of blocks in the DAG.
    pub total: u64,
    /// Maximum layer of the DAG.
    pub layer: u64,
    /// Height of the main chain.
    pub main_height: u64,
    /// Order of the main chain tip.
    pub main_order: u64,
}

impl GraphState {
    pub fn new(
        tips: impl IntoIterator<Item = Hash>,
        total: u64,
        layer: u64,
        main_height: u64,
        main_order: u64,
    ) -> Self {
        Self {
            tips: tips.into_iter().collect(),
            total,
            layer,
            main_height,
            main_order,
        }
    }

    /// True when `self` is strictly ahead of `other`.
    pub fn is_excellent(&self, other: &GraphState) -> bool {
        self.progress_cmp(other) == Ordering::Greater
    }

    /// True only for identical states (including the tip set).
    pub fn is_equal(&self, other: &GraphState) -> bool {
        self == other
    }

    fn progress_cmp(&self, other: &GraphState) -> Ordering {
        self.main_height
            .cmp(&other.main_height)
            .then(self.main_order.cmp(&other.main_order))
            .then(self.total.cmp(&other.total))
            .then(self.layer.cmp(&other.layer))
            .then(self.tips.len().cmp(&other.tips.len()))
            .then_with(|| self.tips.cmp(&other.tips))
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(tips={} total={} layer={} main_height={} main_order={})",
            self.tips.len(),
            self.total,
            self.layer,
            self.main_height,
            self.main_order
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hash(n: u8) -> Hash {
        Hash([n; 32])
    }

    fn state(main_height: u64, total: u64, tips: &[u8]) -> GraphState {
        GraphState::new(tips.iter().map(|n| hash(*n)), total, 0, main_height, main_height)
    }

    #[test]
    fn test_excellent_is_irreflexive() {
        let gs = state(10, 12, &[1, 2]);
        assert!(!gs.is_excellent(&gs.clone()));
        assert!(gs.is_equal(&gs.clone()));
    }

    #[rstest]
    #[case(state(11, 12, &[1]), state(10, 40, &[1, 2, 3]))]
    #[case(state(10, 13, &[1]), state(10, 12, &[1]))]
    #[case(state(10, 12, &[1, 2]), state(10, 12, &[1]))]
    #[case(state(10, 12, &[3]), state(10, 12, &[2]))]
    fn test_excellent_is_asymmetric(#[case] ahead: GraphState, #[case] behind: GraphState) {
        assert!(ahead.is_excellent(&behind));
        assert!(!behind.is_excellent(&ahead));
        assert!(!ahead.is_equal(&behind));
    }

    #[test]
    fn test_equal_requires_identical_tips() {
        let a = state(10, 12, &[1, 2]);
        let b = state(10, 12, &[2, 1]);
        let c = state(10, 12, &[1, 3]);
        assert!(a.is_equal(&b));
        assert!(!a.is_equal(&c));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_string(&state(1, 2, &[])).unwrap();
        assert!(json.contains("mainHeight"));
    }
}
