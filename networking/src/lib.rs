pub mod peers;
pub mod sync;
pub mod time_source;
pub mod types;

pub use peers::{Peer, PeerRegistry, PeerTable};
pub use time_source::MedianTime;
pub use types::{ConnectionState, Direction, PeerCount, PeerId};
