/// Orphan pool for blocks whose parents are not yet known.
///
/// Blocks can arrive out of order: a child may be relayed before its parent,
/// or parallel downloads may complete in a different order than requested.
/// Such blocks are parked here until every parent is connected.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use containers::{Block, Hash};

#[derive(Debug, Clone)]
struct OrphanBlock {
    block: Block,
    received: Instant,
    expiration: Instant,
}

/// Bounded set of orphan blocks indexed by hash and by missing parent.
#[derive(Debug, Clone)]
pub struct OrphanPool {
    orphans: HashMap<Hash, OrphanBlock>,

    /// Parent hash -> orphans that reference it
    children: HashMap<Hash, HashSet<Hash>>,

    max_orphans: usize,
    expiration: Duration,
}

impl OrphanPool {
    pub fn new(max_orphans: usize, expiration: Duration) -> Self {
        Self {
            orphans: HashMap::new(),
            children: HashMap::new(),
            max_orphans,
            expiration,
        }
    }

    /// Park a block. When the pool is full the oldest orphan is evicted first.
    ///
    /// Returns false if the block was already present.
    pub fn add(&mut self, block: Block, now: Instant) -> bool {
        let hash = block.hash();
        if self.orphans.contains_key(&hash) {
            return false;
        }

        while self.max_orphans > 0 && self.orphans.len() >= self.max_orphans {
            let Some(oldest) = self.oldest() else { break };
            self.remove(&oldest);
        }

        for parent in block.parents() {
            self.children.entry(*parent).or_default().insert(hash);
        }
        self.orphans.insert(
            hash,
            OrphanBlock {
                block,
                received: now,
                expiration: now + self.expiration,
            },
        );
        true
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Block> {
        self.orphans.get(hash).map(|orphan| &orphan.block)
    }

    /// Remove an orphan and unlink it from its parents' child sets.
    pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
        let orphan = self.orphans.remove(hash)?;
        for parent in orphan.block.parents() {
            if let Some(children) = self.children.get_mut(parent) {
                children.remove(hash);
                if children.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
        Some(orphan.block)
    }

    /// Orphans that reference `parent`.
    pub fn children_of(&self, parent: &Hash) -> Vec<Hash> {
        let mut children: Vec<Hash> = self
            .children
            .get(parent)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        children.sort();
        children
    }

    /// Evict expired orphans, then the oldest ones until the pool is within
    /// its bound. Returns the number of evicted blocks.
    pub fn refresh(&mut self, now: Instant) -> usize {
        let expired: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.expiration <= now)
            .map(|(hash, _)| *hash)
            .collect();

        let mut evicted = 0;
        for hash in expired {
            self.remove(&hash);
            evicted += 1;
        }

        while self.orphans.len() > self.max_orphans {
            let Some(oldest) = self.oldest() else { break };
            self.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    /// Missing parents of orphans received within `window`.
    ///
    /// A parent counts as missing when `is_known` rejects it and it is not an
    /// orphan itself. The result is sorted and deduplicated.
    pub fn recent_parents(
        &self,
        now: Instant,
        window: Duration,
        is_known: impl Fn(&Hash) -> bool,
    ) -> Vec<Hash> {
        self.orphans
            .values()
            .filter(|orphan| now.saturating_duration_since(orphan.received) <= window)
            .flat_map(|orphan| orphan.block.parents().iter().copied())
            .filter(|parent| !is_known(parent) && !self.orphans.contains_key(parent))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn oldest(&self) -> Option<Hash> {
        self.orphans
            .iter()
            .min_by_key(|(hash, orphan)| (orphan.received, **hash))
            .map(|(hash, _)| *hash)
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn clear(&mut self) {
        self.orphans.clear();
        self.children.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hash(n: u8) -> Hash {
        Hash([n; 32])
    }

    #[test]
    fn test_add_and_index_children() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(60));
        let now = Instant::now();
        let block = Block::new(vec![hash(1), hash(2)], 0);
        let block_hash = block.hash();

        assert!(pool.add(block.clone(), now));
        assert!(!pool.add(block, now));
        assert_eq!(pool.children_of(&hash(1)), vec![block_hash]);
        assert_eq!(pool.children_of(&hash(2)), vec![block_hash]);
    }

    #[test]
    fn test_full_pool_evicts_oldest() {
        let mut pool = OrphanPool::new(2, Duration::from_secs(60));
        let now = Instant::now();
        let first = Block::new(vec![hash(1)], 1);
        let second = Block::new(vec![hash(1)], 2);
        let third = Block::new(vec![hash(1)], 3);

        pool.add(first.clone(), now);
        pool.add(second.clone(), now + Duration::from_secs(1));
        pool.add(third.clone(), now + Duration::from_secs(2));

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&first.hash()));
        assert!(pool.contains(&second.hash()));
        assert!(pool.contains(&third.hash()));
    }

    #[test]
    fn test_refresh_evicts_expired() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(60));
        let now = Instant::now();
        pool.add(Block::new(vec![hash(1)], 1), now);
        pool.add(Block::new(vec![hash(1)], 2), now + Duration::from_secs(30));

        assert_eq!(pool.refresh(now + Duration::from_secs(61)), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_recent_parents_skips_known_and_orphan_parents() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(3600));
        let now = Instant::now();

        let orphan_parent = Block::new(vec![hash(9)], 1);
        let child = Block::new(vec![orphan_parent.hash(), hash(2), hash(3)], 2);
        pool.add(orphan_parent, now);
        pool.add(child, now);

        let known = hash(3);
        let parents = pool.recent_parents(now, Duration::from_secs(60), |h| *h == known);
        let mut expected = vec![hash(2), hash(9)];
        expected.sort();
        assert_eq!(parents, expected);
    }

    #[test]
    fn test_recent_parents_ignores_old_orphans() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(3600));
        let now = Instant::now();
        pool.add(Block::new(vec![hash(4)], 1), now);

        let later = now + Duration::from_secs(120);
        assert!(pool
            .recent_parents(later, Duration::from_secs(60), |_| false)
            .is_empty());
    }

    #[test]
    fn test_remove_unlinks_children() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(60));
        let block = Block::new(vec![hash(1)], 0);
        let block_hash = block.hash();
        pool.add(block, Instant::now());

        assert!(pool.remove(&block_hash).is_some());
        assert!(pool.children_of(&hash(1)).is_empty());
        assert!(pool.is_empty());
    }
}
