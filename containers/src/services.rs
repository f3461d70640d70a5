use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Service bits advertised by a node during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceFlag(pub u64);

impl ServiceFlag {
    pub const NONE: ServiceFlag = ServiceFlag(0);
    /// Full node serving the whole DAG.
    pub const FULL_NODE: ServiceFlag = ServiceFlag(1 << 0);
    /// Supports bloom filtering (`filterload`, `filteradd`, `filterclear`, `mempool`).
    pub const BLOOM: ServiceFlag = ServiceFlag(1 << 1);
    /// Serves committed filters.
    pub const CF: ServiceFlag = ServiceFlag(1 << 2);
    /// Relays unconfirmed transactions.
    pub const RELAY: ServiceFlag = ServiceFlag(1 << 3);

    pub fn contains(self, other: ServiceFlag) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ServiceFlag {
    type Output = ServiceFlag;

    fn bitor(self, rhs: ServiceFlag) -> ServiceFlag {
        ServiceFlag(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
