use crate::{Hash, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: u32,
    /// Parent blocks; a DAG block may reference several.
    pub parents: Vec<Hash>,
    pub tx_root: Hash,
    pub state_root: Hash,
    /// Unix time in seconds.
    pub timestamp: u64,
    pub difficulty: u32,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(4 + self.parents.len() * 32 + 84);
        buf.extend_from_slice(&self.version.to_le_bytes());
        for parent in &self.parents {
            buf.extend_from_slice(parent.as_bytes());
        }
        buf.extend_from_slice(self.tx_root.as_bytes());
        buf.extend_from_slice(self.state_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        Hash::digest(&buf)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(parents: Vec<Hash>, nonce: u64) -> Self {
        Self {
            header: BlockHeader {
                parents,
                nonce,
                ..Default::default()
            },
            transactions: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.block_hash()
    }

    pub fn parents(&self) -> &[Hash] {
        &self.header.parents
    }
}

/// Block header plus the hashes of the transactions that matched a peer's
/// bloom filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub total_transactions: u32,
    pub matched: Vec<Hash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_depends_on_parents() {
        let a = Block::new(vec![Hash([1; 32])], 0);
        let b = Block::new(vec![Hash([2; 32])], 0);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.header.block_hash());
    }
}
