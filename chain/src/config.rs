use std::time::Duration;

/// Maximum number of orphan blocks kept in memory.
pub const MAX_ORPHAN_BLOCKS: usize = 500;

/// Orphans older than this are evicted on refresh.
pub const ORPHAN_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Orphans received within this window count as "recent" when choosing which
/// parents to request.
pub const RECENT_ORPHAN_WINDOW: Duration = Duration::from_secs(10 * 60);

/// The chain is not current while its best tip is older than this.
pub const MAX_TIP_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub max_orphan_blocks: usize,
    pub orphan_expiration: Duration,
    pub recent_orphan_window: Duration,
    pub max_tip_age_secs: u64,
}

pub const DEFAULT_CONFIG: ChainConfig = ChainConfig {
    max_orphan_blocks: MAX_ORPHAN_BLOCKS,
    orphan_expiration: ORPHAN_EXPIRATION,
    recent_orphan_window: RECENT_ORPHAN_WINDOW,
    max_tip_age_secs: MAX_TIP_AGE_SECS,
};

impl Default for ChainConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}
