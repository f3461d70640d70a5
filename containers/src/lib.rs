pub mod types;
pub mod graph_state;
pub mod block;
pub mod transaction;
pub mod inventory;
pub mod bloom;
pub mod services;

pub use block::{Block, BlockHeader, MerkleBlock};
pub use bloom::{
    BloomFilter, BloomUpdateType, FilterError, FilterLoad, MAX_FILTER_ADD_DATA_SIZE,
    MAX_FILTER_LOAD_FILTER_SIZE, MAX_FILTER_LOAD_HASH_FUNCS,
};
pub use graph_state::GraphState;
pub use inventory::{InvType, InvVect, Inventory, InventoryError, MAX_INV_PER_MSG};
pub use services::ServiceFlag;
pub use transaction::{OutPoint, Transaction, TxDesc, TxInput, TxOutput};
pub use types::{Amount, Hash};
